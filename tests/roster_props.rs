use std::collections::HashSet;

use presence_sync::models::User;
use presence_sync::services::{Bucket, FriendRoster};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(usize, &'static str),
    Remove(usize),
    Presence(usize, &'static str),
    Rename(usize, String),
    Favorite(usize, usize),
    Unfavorite(usize),
    SortByName(usize, bool),
}

const IDS: usize = 6;
const FAVORITES: usize = 4;

fn user_id(n: usize) -> String {
    format!("usr_{n}")
}

fn user(n: usize, state: &str, name: &str) -> User {
    User {
        id: user_id(n),
        display_name: name.to_string(),
        state: state.to_string(),
        is_friend: true,
        ..User::default()
    }
}

fn state() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("online"), Just("active"), Just("offline")]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS, state()).prop_map(|(n, s)| Op::Add(n, s)),
        (0..IDS).prop_map(Op::Remove),
        (0..IDS, state()).prop_map(|(n, s)| Op::Presence(n, s)),
        (0..IDS, "[a-z]{1,6}").prop_map(|(n, name)| Op::Rename(n, name)),
        (0..FAVORITES, 0..IDS).prop_map(|(f, n)| Op::Favorite(f, n)),
        (0..FAVORITES).prop_map(Op::Unfavorite),
        (0..Bucket::ALL.len(), any::<bool>()).prop_map(|(b, on)| Op::SortByName(b, on)),
    ]
}

fn apply(roster: &mut FriendRoster, op: &Op) {
    match op {
        Op::Add(n, state) => roster.add(&user(*n, state, &user_id(*n))),
        Op::Remove(n) => {
            roster.remove(&user_id(*n));
        }
        Op::Presence(n, state) => {
            let name = roster
                .get(&user_id(*n))
                .map(|e| e.display_name.clone())
                .unwrap_or_default();
            roster.apply_user(&user(*n, state, &name));
        }
        Op::Rename(n, name) => {
            let state = roster
                .get(&user_id(*n))
                .map(|e| e.state.clone())
                .unwrap_or_else(|| "offline".to_string());
            roster.apply_user(&user(*n, &state, name));
        }
        Op::Favorite(f, n) => roster.track_favorite(&format!("fvrt_{f}"), &user_id(*n)),
        Op::Unfavorite(f) => roster.untrack_favorite(&format!("fvrt_{f}")),
        Op::SortByName(b, on) => roster.set_sort_by_name(Bucket::ALL[*b], *on),
    }
}

proptest! {
    #[test]
    fn every_friend_sits_in_exactly_one_bucket(ops in prop::collection::vec(op(), 0..60)) {
        let mut roster = FriendRoster::new();
        for op in &ops {
            apply(&mut roster, op);
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for bucket in Bucket::ALL {
            let members: Vec<_> = roster.ordered(bucket).into_iter().cloned().collect();
            prop_assert_eq!(members.len(), roster.bucket_len(bucket));
            total += members.len();
            for entry in members {
                prop_assert_eq!(entry.bucket(), bucket);
                prop_assert_eq!(entry.is_vip, roster.is_vip(&entry.id));
                prop_assert_eq!(roster.bucket_of(&entry.id), Some(bucket));
                prop_assert!(seen.insert(entry.id.clone()), "{} listed twice", entry.id);
            }
        }
        prop_assert_eq!(total, roster.len());
    }

    #[test]
    fn name_order_is_alphabetical(names in prop::collection::vec("[a-zA-Z]{1,8}", 1..IDS)) {
        let mut roster = FriendRoster::new();
        roster.set_sort_by_name(Bucket::Online, true);
        for (n, name) in names.iter().enumerate() {
            roster.add(&user(n, "online", name));
        }

        let ordered: Vec<String> = roster
            .ordered(Bucket::Online)
            .into_iter()
            .map(|e| e.display_name.to_lowercase())
            .collect();
        let mut expected = ordered.clone();
        expected.sort();
        prop_assert_eq!(ordered, expected);
        prop_assert!(!roster.needs_sort(Bucket::Online));
    }
}

#[test]
fn vip_follows_favorite_before_friendship() {
    let mut roster = FriendRoster::new();
    roster.track_favorite("fvrt_1", "usr_1");
    roster.add(&user(1, "online", "Alice"));
    assert_eq!(roster.bucket_of("usr_1"), Some(Bucket::VipOnline));

    roster.apply_user(&user(1, "active", "Alice"));
    assert_eq!(roster.bucket_of("usr_1"), Some(Bucket::Active));

    roster.apply_user(&user(1, "online", "Alice"));
    roster.untrack_favorite("fvrt_1");
    assert_eq!(roster.bucket_of("usr_1"), Some(Bucket::Online));
}
