//! Next objectives
//!
//! A [`NextObjective`] is an application's request for a set of output
//! paths, independent of how a particular switch pipeline realizes them.
//! It is immutable once built; the outcome is reported through its
//! [`ObjectiveContext`].

use crate::error::ObjectiveError;
use pipeliner_group::{AppId, NextId, Selector, Treatment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How the buckets of an objective relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextType {
    /// A single output path
    Simple,
    /// Load balancing across buckets
    Hashed,
    /// Replication to every bucket
    Broadcast,
    /// First live bucket
    Failover,
    /// Multicast replication tree
    Multicast,
}

impl fmt::Display for NextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "SIMPLE",
            Self::Hashed => "HASHED",
            Self::Broadcast => "BROADCAST",
            Self::Failover => "FAILOVER",
            Self::Multicast => "MULTICAST",
        };
        f.write_str(name)
    }
}

/// Requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextOp {
    /// Create the whole group chain
    Add,
    /// Add buckets to an existing chain
    AddToExisting,
    /// Tear the chain down
    Remove,
    /// Remove buckets from an existing chain
    RemoveFromExisting,
    /// Replace buckets
    Modify,
    /// Check device state against the stored chain
    Verify,
}

impl fmt::Display for NextOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "ADD",
            Self::AddToExisting => "ADD_TO_EXISTING",
            Self::Remove => "REMOVE",
            Self::RemoveFromExisting => "REMOVE_FROM_EXISTING",
            Self::Modify => "MODIFY",
            Self::Verify => "VERIFY",
        };
        f.write_str(name)
    }
}

/// Outcome callbacks of an objective
///
/// Exactly one of the two is invoked per submitted objective.
pub trait ObjectiveContext: Send + Sync {
    /// The objective is fully realized on the device
    fn on_success(&self, objective: &NextObjective);

    /// The objective was rejected or could not be realized
    fn on_error(&self, objective: &NextObjective, error: ObjectiveError);
}

/// Vendor-neutral forwarding intent
#[derive(Clone)]
pub struct NextObjective {
    id: NextId,
    kind: NextType,
    op: NextOp,
    treatments: Vec<Treatment>,
    meta: Option<Selector>,
    app_id: AppId,
    context: Option<Arc<dyn ObjectiveContext>>,
}

impl fmt::Debug for NextObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextObjective")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("op", &self.op)
            .field("treatments", &self.treatments)
            .field("meta", &self.meta)
            .field("app_id", &self.app_id)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

impl NextObjective {
    /// Start building an objective
    #[inline]
    #[must_use]
    pub fn builder(id: NextId, kind: NextType) -> NextObjectiveBuilder {
        NextObjectiveBuilder {
            id,
            kind,
            treatments: Vec::new(),
            meta: None,
            app_id: AppId::new("default"),
            context: None,
        }
    }

    /// Objective id
    #[inline]
    #[must_use]
    pub fn id(&self) -> NextId {
        self.id
    }

    /// Objective type
    #[inline]
    #[must_use]
    pub fn kind(&self) -> NextType {
        self.kind
    }

    /// Requested operation
    #[inline]
    #[must_use]
    pub fn op(&self) -> NextOp {
        self.op
    }

    /// One treatment per bucket
    #[inline]
    #[must_use]
    pub fn treatments(&self) -> &[Treatment] {
        &self.treatments
    }

    /// Optional metadata
    #[inline]
    #[must_use]
    pub fn meta(&self) -> Option<&Selector> {
        self.meta.as_ref()
    }

    /// Requesting application
    #[inline]
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Same objective with its callbacks detached
    pub(crate) fn without_context(&self) -> Self {
        Self {
            context: None,
            ..self.clone()
        }
    }

    /// Report success to the originator
    pub fn notify_success(&self) {
        if let Some(context) = &self.context {
            context.on_success(self);
        }
    }

    /// Report failure to the originator
    pub fn notify_error(&self, error: ObjectiveError) {
        if let Some(context) = &self.context {
            context.on_error(self, error);
        }
    }
}

/// Builder for [`NextObjective`]; the terminal method picks the operation
#[must_use]
pub struct NextObjectiveBuilder {
    id: NextId,
    kind: NextType,
    treatments: Vec<Treatment>,
    meta: Option<Selector>,
    app_id: AppId,
    context: Option<Arc<dyn ObjectiveContext>>,
}

impl NextObjectiveBuilder {
    /// Add a bucket
    #[inline]
    pub fn with_treatment(mut self, treatment: Treatment) -> Self {
        self.treatments.push(treatment);
        self
    }

    /// Add several buckets
    #[inline]
    pub fn with_treatments(mut self, treatments: impl IntoIterator<Item = Treatment>) -> Self {
        self.treatments.extend(treatments);
        self
    }

    /// Attach metadata
    #[inline]
    pub fn with_meta(mut self, meta: Selector) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the requesting application
    #[inline]
    pub fn from_app(mut self, app_id: AppId) -> Self {
        self.app_id = app_id;
        self
    }

    /// Attach outcome callbacks
    #[inline]
    pub fn with_context(mut self, context: Arc<dyn ObjectiveContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Build with an explicit operation
    #[must_use]
    pub fn build(self, op: NextOp) -> NextObjective {
        NextObjective {
            id: self.id,
            kind: self.kind,
            op,
            treatments: self.treatments,
            meta: self.meta,
            app_id: self.app_id,
            context: self.context,
        }
    }

    /// Build an ADD objective
    #[must_use]
    pub fn add(self) -> NextObjective {
        self.build(NextOp::Add)
    }

    /// Build an ADD_TO_EXISTING objective
    #[must_use]
    pub fn add_to_existing(self) -> NextObjective {
        self.build(NextOp::AddToExisting)
    }

    /// Build a REMOVE objective
    #[must_use]
    pub fn remove(self) -> NextObjective {
        self.build(NextOp::Remove)
    }

    /// Build a REMOVE_FROM_EXISTING objective
    #[must_use]
    pub fn remove_from_existing(self) -> NextObjective {
        self.build(NextOp::RemoveFromExisting)
    }

    /// Build a VERIFY objective
    #[must_use]
    pub fn verify(self) -> NextObjective {
        self.build(NextOp::Verify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pipeliner_group::PortNumber;

    #[derive(Default)]
    struct Outcomes(Mutex<Vec<Result<NextId, ObjectiveError>>>);

    impl ObjectiveContext for Outcomes {
        fn on_success(&self, objective: &NextObjective) {
            self.0.lock().push(Ok(objective.id()));
        }

        fn on_error(&self, _objective: &NextObjective, error: ObjectiveError) {
            self.0.lock().push(Err(error));
        }
    }

    #[test]
    fn builder_sets_operation() {
        let treatment = Treatment::builder().output(PortNumber::new(1)).build();
        let objective = NextObjective::builder(NextId::new(1), NextType::Simple)
            .with_treatment(treatment.clone())
            .from_app(AppId::new("fwd"))
            .remove();

        assert_eq!(objective.op(), NextOp::Remove);
        assert_eq!(objective.treatments(), &[treatment]);
        assert_eq!(objective.app_id().as_str(), "fwd");
        assert!(objective.meta().is_none());
    }

    #[test]
    fn notifications_reach_context() {
        let outcomes = Arc::new(Outcomes::default());
        let objective = NextObjective::builder(NextId::new(3), NextType::Hashed)
            .with_context(outcomes.clone())
            .add();

        objective.notify_success();
        objective.notify_error(ObjectiveError::BadParams);
        assert_eq!(
            *outcomes.0.lock(),
            vec![Ok(NextId::new(3)), Err(ObjectiveError::BadParams)]
        );
    }

    #[test]
    fn detached_copy_keeps_request_but_not_callbacks() {
        let outcomes = Arc::new(Outcomes::default());
        let objective = NextObjective::builder(NextId::new(5), NextType::Broadcast)
            .with_treatment(Treatment::builder().output(PortNumber::new(2)).build())
            .with_context(outcomes.clone())
            .verify();
        let detached = objective.without_context();

        assert_eq!(detached.op(), NextOp::Verify);
        assert_eq!(detached.treatments(), objective.treatments());
        detached.notify_success();
        assert!(outcomes.0.lock().is_empty());
    }

    #[test]
    fn no_context_is_silent() {
        let objective = NextObjective::builder(NextId::new(4), NextType::Simple).add();
        objective.notify_error(ObjectiveError::Unknown);
    }
}
