use pipeliner_chain::{Chain, ChainHandle};
use pipeliner_core::{NextObjective, NextObjectiveBuilder, NextType, ObjectiveError};
use pipeliner_group::{AppId, GroupBucket, GroupKey, GroupService, MplsLabel, NextId, Treatment};
use pipeliner_test_utils::{
    broadcast, device, fast_config, framing, hashed, hashed_labelled, port, routed, simple, vlan,
    vlan_meta, GroupRequest, Harness, Outcome, ScriptedGroupService,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn leaf(vlan_id: u16, out: u64) -> GroupKey {
    GroupKey::l2_interface(&device(), vlan(vlan_id), port(out))
}

fn add(builder: NextObjectiveBuilder) -> NextObjective {
    builder.add()
}

fn add_bucket(builder: NextObjectiveBuilder) -> NextObjective {
    builder.add_to_existing()
}

fn remove_bucket(builder: NextObjectiveBuilder) -> NextObjective {
    builder.remove_from_existing()
}

fn verify(builder: NextObjectiveBuilder) -> NextObjective {
    builder.verify()
}

fn removed_buckets(h: &Harness) -> Vec<(GroupKey, Vec<GroupBucket>)> {
    h.groups
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            GroupRequest::RemoveBuckets { key, buckets } => Some((key, buckets)),
            _ => None,
        })
        .collect()
}

fn added_buckets(h: &Harness) -> Vec<(GroupKey, Vec<GroupBucket>)> {
    h.groups
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            GroupRequest::AddBuckets { key, buckets } => Some((key, buckets)),
            _ => None,
        })
        .collect()
}

/// Confirm group adds only, leaving bucket edits pending
fn confirm_adds(h: &Harness) {
    loop {
        let submitted = h.groups.submitted();
        if submitted.is_empty() {
            return;
        }
        for key in submitted {
            h.groups.confirm(key);
        }
    }
}

fn leaves(h: &Harness, id: u32) -> Vec<GroupKey> {
    h.pipeliner
        .stored_handle(NextId::new(id))
        .unwrap()
        .unwrap()
        .chains()
        .iter()
        .map(Chain::leaf)
        .collect()
}

fn installed_hashed(id: u32, ports: &[u64]) -> Harness {
    let h = Harness::auto();
    h.submit(hashed(id, ports, 10), add);
    assert_eq!(h.context.successes(), 1);
    h
}

#[test]
fn test_add_bucket_hooks_new_chain_under_root() {
    let h = installed_hashed(1, &[1, 2]);
    let root = h.root(1);
    h.groups.set_auto_confirm(false);

    h.submit(hashed(1, &[3], 10), add_bucket);
    assert_eq!(h.groups.submitted(), vec![leaf(10, 3)]);
    assert_eq!(h.groups.bucket_adds(root), 0);

    confirm_adds(&h);
    assert_eq!(h.groups.pending_edits(), vec![root]);
    assert_eq!(h.pipeliner.stats().pending_updates, 1);
    // the handle already carries the chain, the caller hears nothing yet
    assert_eq!(leaves(&h, 1).len(), 3);
    assert_eq!(h.context.successes(), 1);

    assert!(h.groups.confirm_edit(root));
    assert_eq!(h.context.successes(), 2);
    assert!(h.pipeliner.stats().is_idle());

    let handle = h.pipeliner.stored_handle(NextId::new(1)).unwrap().unwrap();
    assert_eq!(handle.chain_count(), 3);
    assert_eq!(handle.root(), root);
    assert_eq!(handle.chains()[2].leaf(), leaf(10, 3));
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 3);
    // the root itself is never re-created
    assert_eq!(h.groups.add_count(root), 1);
}

#[test]
fn test_remove_bucket_unhooks_chain_and_keeps_groups() {
    let h = installed_hashed(2, &[1, 2, 3]);
    let root = h.root(2);

    h.submit(hashed(2, &[2], 10), remove_bucket);
    assert_eq!(h.context.successes(), 2);

    let handle = h.pipeliner.stored_handle(NextId::new(2)).unwrap().unwrap();
    assert_eq!(handle.chain_count(), 2);
    assert!(handle.chains().iter().all(|c| c.leaf() != leaf(10, 2)));
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 2);
    assert!(h.groups.is_installed(leaf(10, 2)));
    assert!(h.groups.remove_order().is_empty());

    let removed = removed_buckets(&h);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].0, root);
    assert_eq!(removed[0].1.len(), 1);
}

#[test]
fn test_remove_bucket_matches_port_and_label() {
    let h = Harness::auto();
    h.submit(hashed_labelled(10, &[(5, 100), (5, 200)], 10), add);
    assert_eq!(h.context.successes(), 1);
    let root = h.root(10);
    assert_eq!(leaves(&h, 10), vec![leaf(10, 5), leaf(10, 5)]);

    h.submit(hashed_labelled(10, &[(5, 200)], 10), remove_bucket);
    assert_eq!(h.context.successes(), 2);

    let handle = h.pipeliner.stored_handle(NextId::new(10)).unwrap().unwrap();
    assert_eq!(handle.chain_count(), 1);
    let vpn = h.groups.group(handle.chains()[0].below_root().unwrap()).unwrap();
    assert_eq!(
        vpn.buckets[0].treatment.mpls_label(),
        Some(MplsLabel::new(100).unwrap())
    );
    let remaining = h.groups.group(root).unwrap().buckets;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].treatment.group(), Some(vpn.id));

    // a different label on the same port is not a match
    h.submit(hashed_labelled(10, &[(5, 300)], 10), remove_bucket);
    assert_eq!(h.context.failures(), vec![ObjectiveError::BadParams]);
}

#[test]
fn test_add_existing_bucket_is_not_reinstalled() {
    let h = installed_hashed(9, &[1, 2]);
    let root = h.root(9);
    let adds = h.groups.add_order().len();

    h.submit(hashed(9, &[2], 10), add_bucket);
    assert_eq!(
        h.context.outcomes(),
        vec![Outcome::Success(NextId::new(9)), Outcome::Success(NextId::new(9))]
    );
    assert_eq!(leaves(&h, 9).len(), 2);
    assert_eq!(h.groups.bucket_adds(root), 0);
    assert_eq!(h.groups.add_order().len(), adds);

    // only the new port of a mixed request is installed
    h.submit(hashed(9, &[2, 3], 10), add_bucket);
    assert_eq!(h.context.successes(), 3);
    assert_eq!(leaves(&h, 9), vec![leaf(10, 1), leaf(10, 2), leaf(10, 3)]);
    assert_eq!(h.groups.add_count(leaf(10, 2)), 1);
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 3);
}

#[test]
fn test_labelled_chain_blocks_plain_bucket_on_its_port() {
    let h = Harness::auto();
    h.submit(hashed_labelled(11, &[(5, 100)], 10), add);
    let root = h.root(11);

    h.submit(hashed(11, &[5], 10), add_bucket);
    assert_eq!(leaves(&h, 11).len(), 1);

    h.submit(hashed_labelled(11, &[(5, 200)], 10), add_bucket);
    assert_eq!(leaves(&h, 11), vec![leaf(10, 5), leaf(10, 5)]);
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 2);
    assert_eq!(h.context.successes(), 3);
}

#[test]
fn test_broadcast_bucket_edits() {
    let h = Harness::auto();
    h.submit(broadcast(12, &[1, 2, 3], 10), add);
    let root = h.root(12);

    h.submit(broadcast(12, &[2], 10), remove_bucket);
    assert_eq!(h.context.successes(), 2);
    assert_eq!(leaves(&h, 12), vec![leaf(10, 1), leaf(10, 3)]);
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 2);
    assert!(h.groups.is_installed(leaf(10, 2)));
    let l2 = h.groups.group(leaf(10, 2)).unwrap().id;
    assert_eq!(removed_buckets(&h)[0].1[0].treatment.group(), Some(l2));

    h.submit(broadcast(12, &[4], 10), add_bucket);
    assert_eq!(h.context.successes(), 3);
    let handle = h.pipeliner.stored_handle(NextId::new(12)).unwrap().unwrap();
    assert_eq!(handle.chains()[2], Chain::new(root).then(leaf(10, 4)));
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 3);

    // flooding to a port already in the group changes nothing
    h.submit(broadcast(12, &[1], 10), add_bucket);
    assert_eq!(h.context.successes(), 4);
    assert_eq!(leaves(&h, 12).len(), 3);
}

#[test]
fn test_remove_last_bucket_is_refused() {
    let h = installed_hashed(3, &[1]);
    h.submit(hashed(3, &[1], 10), remove_bucket);
    assert_eq!(
        h.context.outcomes(),
        vec![
            Outcome::Success(NextId::new(3)),
            Outcome::Failure(NextId::new(3), ObjectiveError::BadParams),
        ]
    );
    assert_eq!(
        h.pipeliner.stored_handle(NextId::new(3)).unwrap().unwrap().chain_count(),
        1
    );
}

#[test]
fn test_bucket_edit_rejections() {
    let h = installed_hashed(4, &[1, 2]);
    h.submit(hashed(4, &[9], 10), remove_bucket);
    h.submit(hashed(4, &[], 10), add_bucket);
    h.submit(hashed(5, &[5], 10), add_bucket);
    h.submit(simple(4, framing(5), 10), add_bucket);
    h.submit(simple(4, framing(5), 10), remove_bucket);

    assert_eq!(
        h.context.failures(),
        vec![
            ObjectiveError::BadParams,
            ObjectiveError::BadParams,
            ObjectiveError::GroupMissing,
            ObjectiveError::Unsupported,
            ObjectiveError::Unsupported,
        ]
    );
}

#[test]
fn test_unconfirmed_bucket_edits_expire() {
    let h = Harness::with(ScriptedGroupService::auto_confirming(), fast_config());
    h.submit(hashed(13, &[1, 2, 3], 10), add);
    let root = h.root(13);
    h.groups.set_auto_confirm(false);

    h.submit(hashed(13, &[3], 10), remove_bucket);
    h.submit(hashed(13, &[4], 10), add_bucket);
    confirm_adds(&h);
    assert_eq!(h.groups.pending_edits(), vec![root, root]);
    assert_eq!(h.pipeliner.stats().pending_updates, 2);
    assert!(!h.pipeliner.stats().is_idle());

    std::thread::sleep(Duration::from_millis(350));
    h.pipeliner.check_pending();

    let failures = h.context.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.contains(&ObjectiveError::GroupRemovalFailed));
    assert!(failures.contains(&ObjectiveError::GroupInstallationFailed));
    assert_eq!(h.context.successes(), 1);
    assert_eq!(h.pipeliner.stats().pending_updates, 0);

    // a late confirmation reports nothing more
    assert!(h.groups.confirm_edit(root));
    assert_eq!(h.context.len(), 3);
}

#[test]
fn test_bucket_edit_settles_by_polling() {
    let h = installed_hashed(14, &[1, 2]);
    let root = h.root(14);
    h.groups.set_auto_confirm(false);

    h.submit(hashed(14, &[2], 10), remove_bucket);
    h.pipeliner.check_pending();
    assert_eq!(h.context.successes(), 1);

    assert!(h.groups.apply_edit_silently(root));
    h.pipeliner.check_pending();
    assert_eq!(h.context.successes(), 2);
    assert!(h.pipeliner.stats().is_idle());
}

#[test]
fn test_verify_restores_stripped_root_bucket() {
    let h = installed_hashed(15, &[1, 2, 3]);
    let root = h.root(15);
    let stripped = h.groups.strip_bucket(root, 1).unwrap();
    h.groups.set_auto_confirm(false);

    h.submit(hashed(15, &[1, 2, 3], 10), verify);
    assert_eq!(h.context.successes(), 1);
    assert_eq!(added_buckets(&h), vec![(root, vec![stripped])]);

    assert!(h.groups.confirm_edit(root));
    assert_eq!(
        h.context.outcomes(),
        vec![Outcome::Success(NextId::new(15)), Outcome::Success(NextId::new(15))]
    );
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 3);
    assert_eq!(leaves(&h, 15).len(), 3);
}

#[test]
fn test_verify_drops_foreign_root_bucket() {
    let h = installed_hashed(20, &[1, 2]);
    h.submit(simple(21, framing(9), 10), add);
    let root = h.root(20);
    let stray = h.groups.group(leaf(10, 9)).unwrap().id;
    let foreign = GroupBucket::new(Treatment::builder().group(stray).build());
    h.groups
        .add_buckets_to_group(&device(), root, vec![foreign.clone()], &AppId::new("other"));
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 3);

    h.submit(hashed(20, &[1, 2], 10), verify);
    assert_eq!(h.context.successes(), 3);
    assert_eq!(removed_buckets(&h), vec![(root, vec![foreign.clone()])]);
    let buckets = h.groups.group(root).unwrap().buckets;
    assert_eq!(buckets.len(), 2);
    assert!(!buckets.contains(&foreign));
}

#[test]
fn test_verify_reconciles_chains_with_objective() {
    let h = installed_hashed(16, &[1, 2]);
    let root = h.root(16);

    h.submit(hashed(16, &[2, 3], 10), verify);
    assert_eq!(
        h.context.outcomes(),
        vec![Outcome::Success(NextId::new(16)), Outcome::Success(NextId::new(16))]
    );
    assert_eq!(leaves(&h, 16), vec![leaf(10, 2), leaf(10, 3)]);
    assert_eq!(h.groups.group(root).unwrap().buckets.len(), 2);
    // unhooked chains keep their groups
    assert!(h.groups.is_installed(leaf(10, 1)));
    assert!(h.pipeliner.stats().is_idle());
}

#[test]
fn test_verify_in_sync_reports_immediately() {
    let h = Harness::auto();
    h.submit(broadcast(17, &[1, 2], 10), add);
    let requests = h.groups.requests().len();

    h.submit(broadcast(17, &[2, 1], 10), verify);
    assert_eq!(h.context.successes(), 2);
    assert_eq!(h.groups.requests().len(), requests);
}

#[test]
fn test_verify_rejections() {
    let h = installed_hashed(18, &[1]);
    h.submit(simple(18, framing(1), 10), verify);
    h.submit(
        NextObjective::builder(NextId::new(18), NextType::Hashed)
            .with_treatment(Treatment::builder().pop_vlan().build())
            .with_meta(vlan_meta(10)),
        verify,
    );
    h.submit(hashed(19, &[1], 10), verify);

    assert_eq!(
        h.context.failures(),
        vec![
            ObjectiveError::Unsupported,
            ObjectiveError::BadParams,
            ObjectiveError::GroupMissing,
        ]
    );
}

#[test]
fn test_add_bucket_without_root_on_device() {
    let h = Harness::auto();
    let stale = ChainHandle::new(vec![Chain::new(GroupKey::from_raw(0x7000_0042)).then(leaf(10, 1))])
        .unwrap();
    pipeliner_chain::ChainStoreAdapter::new(h.store.clone())
        .put(NextId::new(6), &stale)
        .unwrap();

    h.submit(hashed(6, &[2], 10), add_bucket);
    h.submit(hashed(6, &[1], 10), verify);
    assert_eq!(
        h.context.failures(),
        vec![ObjectiveError::GroupMissing, ObjectiveError::GroupMissing]
    );
    assert!(h.groups.add_order().is_empty());
}

#[test]
fn test_add_bucket_deferred_behind_add() {
    let h = Harness::manual();
    h.submit(hashed(7, &[1], 10), add);
    h.submit(hashed(7, &[2], 10), add_bucket);
    assert_eq!(h.pipeliner.stats().deferred, 1);

    h.groups.confirm_all();
    assert_eq!(h.context.successes(), 2);
    assert_eq!(
        h.pipeliner.stored_handle(NextId::new(7)).unwrap().unwrap().chain_count(),
        2
    );
}

#[test]
fn test_next_mappings_render_chains() {
    let h = Harness::auto();
    h.submit(simple(8, routed(3), 10), add);
    let handle = h.pipeliner.stored_handle(NextId::new(8)).unwrap().unwrap();
    let chain = &handle.chains()[0];
    let l3 = h.groups.group(chain.root()).unwrap().id;
    let l2 = h.groups.group(chain.leaf()).unwrap().id;

    assert_eq!(
        h.pipeliner.next_mappings(&handle),
        vec![format!("  {l3} -->  {l2} --> port:3")]
    );
    assert_eq!(
        h.pipeliner.root_group_id(NextId::new(8)).unwrap(),
        Some(l3)
    );

    let missing = ChainHandle::new(vec![Chain::new(GroupKey::from_raw(0x1234))]).unwrap();
    assert_eq!(h.pipeliner.next_mappings(&missing), vec!["  NoGrp -->".to_string()]);
}
