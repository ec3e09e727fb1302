use std::collections::BTreeMap;

use cf_cascade::{
    CanonicalKey, CascadeEvent, InMemoryTransport, MetadataSnapshot, OptionMode, ResolverSession,
    drive, reconcile,
};
use cf_registry::DimensionId;
use cf_types::OptionItem;
use proptest::prelude::*;

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}

fn key_for(parent: DimensionId, values: &[&str]) -> CanonicalKey {
    let mut parents = BTreeMap::new();
    parents.insert(parent, owned(values));
    CanonicalKey::from_parents(&parents)
}

fn demo_metadata() -> MetadataSnapshot {
    MetadataSnapshot::new()
        .with_options(
            DimensionId::Team,
            vec![OptionItem::plain("WEB_GV"), OptionItem::plain("APP_GV")],
        )
        .with_options(
            DimensionId::Pic,
            vec![
                OptionItem::plain("picA"),
                OptionItem::plain("picB"),
                OptionItem::plain("picC"),
            ],
        )
        .with_options(
            DimensionId::Pid,
            vec![
                OptionItem::new("Publisher 1001", "1001"),
                OptionItem::new("Publisher 1002", "1002"),
            ],
        )
        .with_options(
            DimensionId::Mid,
            vec![
                OptionItem::new("Media 2001", "2001"),
                OptionItem::new("Media 2002", "2002"),
            ],
        )
        .with_options(
            DimensionId::Zid,
            vec![OptionItem::new("Zone 3001", "3001")],
        )
        .with_team_pics("WEB_GV", owned(&["picA", "picB"]))
        .with_team_pics("APP_GV", owned(&["picC"]))
}

/// Transport for the whole demo hierarchy: picA owns publisher 1001, which
/// owns media 2001, which owns zone 3001.
fn demo_transport() -> InMemoryTransport {
    let transport = InMemoryTransport::new();
    transport.stub(
        DimensionId::Pid,
        key_for(DimensionId::Pic, &["picA"]),
        vec![OptionItem::new("Publisher 1001", "1001")],
    );
    transport.stub(
        DimensionId::Pubname,
        key_for(DimensionId::Pid, &["1001"]),
        vec![OptionItem::plain("Daily Bugle")],
    );
    transport.stub(
        DimensionId::Mid,
        key_for(DimensionId::Pid, &["1001"]),
        vec![OptionItem::new("Media 2001", "2001")],
    );
    transport.stub(
        DimensionId::Medianame,
        key_for(DimensionId::Mid, &["2001"]),
        vec![OptionItem::plain("bugle.example")],
    );
    transport.stub(
        DimensionId::Zid,
        key_for(DimensionId::Mid, &["2001"]),
        vec![OptionItem::new("Zone 3001", "3001")],
    );
    transport.stub(
        DimensionId::Zonename,
        key_for(DimensionId::Zid, &["3001"]),
        vec![OptionItem::plain("bugle_top_banner")],
    );
    transport
}

/// Every selected value for a dimension that is not loading and not degraded
/// must appear in that dimension's option set.
fn assert_consistent(session: &ResolverSession) {
    let snapshot = session.snapshot();
    for dimension in snapshot.selection.dimensions() {
        let set = snapshot
            .option_sets
            .get(&dimension)
            .expect("every dimension carries an option set");
        if set.mode == OptionMode::Loading || set.mode == OptionMode::Empty {
            continue;
        }
        for value in snapshot.selection.get(dimension) {
            assert!(
                set.options.iter().any(|option| option.value == *value),
                "selected {value} missing from {dimension} options"
            );
        }
    }
}

#[test]
fn selections_cascade_down_the_full_hierarchy() {
    let transport = demo_transport();
    let mut session = ResolverSession::standard(demo_metadata());

    let outcome = session.apply_selection(DimensionId::Team, owned(&["WEB_GV"]));
    assert!(outcome.pending.is_empty());
    assert_eq!(
        outcome.option_sets[&DimensionId::Pic].mode,
        OptionMode::Filtered
    );

    let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
    drive(&mut session, &transport, outcome.pending);
    let outcome = session.apply_selection(DimensionId::Pid, owned(&["1001"]));
    drive(&mut session, &transport, outcome.pending);
    let outcome = session.apply_selection(DimensionId::Mid, owned(&["2001"]));
    let settled = drive(&mut session, &transport, outcome.pending);

    assert_eq!(
        settled.option_sets[&DimensionId::Zid].options,
        vec![OptionItem::new("Zone 3001", "3001")]
    );
    assert_eq!(
        settled.option_sets[&DimensionId::Medianame].options,
        vec![OptionItem::plain("bugle.example")]
    );
    assert!(settled.pending.is_empty());
    assert_consistent(&session);
}

#[test]
fn switching_teams_cascade_clears_descendant_selections() {
    let transport = demo_transport();
    let mut session = ResolverSession::standard(demo_metadata());

    let outcome = session.apply_selection(DimensionId::Team, owned(&["WEB_GV"]));
    drive(&mut session, &transport, outcome.pending);
    let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
    drive(&mut session, &transport, outcome.pending);
    let outcome = session.apply_selection(DimensionId::Pid, owned(&["1001"]));
    drive(&mut session, &transport, outcome.pending);

    let outcome = session.apply_selection(DimensionId::Team, owned(&["APP_GV"]));
    let settled = drive(&mut session, &transport, outcome.pending);

    assert!(settled.selection.get(DimensionId::Pic).is_empty());
    assert!(settled.selection.get(DimensionId::Pid).is_empty());
    assert_eq!(
        settled.option_sets[&DimensionId::Pic].options,
        vec![OptionItem::plain("picC")]
    );
    assert_consistent(&session);
}

#[test]
fn timeout_degrades_one_dimension_and_keeps_its_selection() {
    // No stubs at all: every remote lookup behaves like a timeout.
    let transport = InMemoryTransport::new();
    let mut session = ResolverSession::standard(demo_metadata());

    session.apply_selection(DimensionId::Pid, owned(&["1001"]));
    let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
    let settled = drive(&mut session, &transport, outcome.pending);

    assert_eq!(
        settled.option_sets[&DimensionId::Pid].mode,
        OptionMode::Empty
    );
    assert_eq!(settled.selection.get(DimensionId::Pid), owned(&["1001"]));
    assert!(settled
        .events
        .iter()
        .any(|e| matches!(e, CascadeEvent::LookupFailed { dimension: DimensionId::Pid, .. })));

    // A retry against a now-working transport restores the dimension.
    let transport = demo_transport();
    let outcome = session.retry_dimension(DimensionId::Pid);
    let settled = drive(&mut session, &transport, outcome.pending);
    assert_eq!(
        settled.option_sets[&DimensionId::Pid].mode,
        OptionMode::Filtered
    );
    assert_eq!(settled.selection.get(DimensionId::Pid), owned(&["1001"]));
    assert_consistent(&session);
}

#[test]
fn out_of_order_completions_settle_on_the_latest_key() {
    let mut session = ResolverSession::standard(demo_metadata());
    session.apply_selection(DimensionId::Pic, owned(&["picA"]));
    let first_key = key_for(DimensionId::Pic, &["picA"]);
    session.apply_selection(DimensionId::Pic, owned(&["picB"]));
    let second_key = key_for(DimensionId::Pic, &["picB"]);

    // The newer lookup lands first, the older one afterwards.
    session.complete_lookup(
        DimensionId::Pid,
        second_key,
        vec![OptionItem::new("Publisher 1002", "1002")],
    );
    let outcome = session.complete_lookup(
        DimensionId::Pid,
        first_key.clone(),
        vec![OptionItem::new("Publisher 1001", "1001")],
    );

    assert!(outcome.events.contains(&CascadeEvent::StaleLookupDiscarded {
        dimension: DimensionId::Pid,
        key: first_key,
    }));
    assert_eq!(
        outcome.option_sets[&DimensionId::Pid].options,
        vec![OptionItem::new("Publisher 1002", "1002")]
    );
    assert_consistent(&session);
}

fn pic_name(index: usize) -> String {
    format!("pic{index}")
}

fn arb_mappings() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
    proptest::collection::btree_map(
        prop_oneof![Just("WEB_GV".to_owned()), Just("APP_GV".to_owned())],
        proptest::collection::btree_set(0usize..6, 0..5)
            .prop_map(|pics| pics.into_iter().map(pic_name).collect::<Vec<_>>()),
        1..=2,
    )
}

proptest! {
    /// After any client-side pass the resolver state is a fixed point of the
    /// reconciliation contract: running it again changes nothing.
    #[test]
    fn client_side_passes_settle_to_a_reconciliation_fixed_point(
        mappings in arb_mappings(),
        teams in proptest::collection::btree_set(
            prop_oneof![Just("WEB_GV".to_owned()), Just("APP_GV".to_owned())],
            0..=2,
        ),
        pics in proptest::collection::btree_set(0usize..6, 0..4),
    ) {
        let mut metadata = MetadataSnapshot::new()
            .with_options(
                DimensionId::Team,
                vec![OptionItem::plain("WEB_GV"), OptionItem::plain("APP_GV")],
            )
            .with_options(
                DimensionId::Pic,
                (0..6).map(|i| OptionItem::plain(pic_name(i))).collect(),
            );
        for (team, pics) in &mappings {
            metadata = metadata.with_team_pics(team.clone(), pics.clone());
        }

        let mut session = ResolverSession::standard(metadata);
        session.apply_selection(
            DimensionId::Pic,
            pics.iter().copied().map(pic_name).collect(),
        );
        let outcome = session.apply_selection(
            DimensionId::Team,
            teams.iter().cloned().collect(),
        );

        // Team->pic resolves in memory, so nothing is pending and the pic
        // option set is exactly the union over the selected teams.
        prop_assert!(outcome.pending.iter().all(|r| r.dimension != DimensionId::Pic));
        let pic_set = &outcome.option_sets[&DimensionId::Pic];
        if teams.is_empty() {
            prop_assert_eq!(pic_set.mode, OptionMode::All);
        } else {
            let expected: std::collections::BTreeSet<&str> = teams
                .iter()
                .filter_map(|team| mappings.get(team))
                .flatten()
                .map(String::as_str)
                .collect();
            for option in &pic_set.options {
                prop_assert!(expected.contains(option.value.as_str()));
            }
        }

        for value in outcome.selection.get(DimensionId::Pic) {
            prop_assert!(pic_set.options.iter().any(|o| &o.value == value));
        }

        let (_, changed) = reconcile(&outcome.option_sets, &outcome.selection);
        prop_assert!(!changed);
    }
}
