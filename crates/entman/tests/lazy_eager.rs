//! Fetch strategies: lazy proxies, eager population, session scoping.

mod support;

use entman::Error;
use std::sync::Arc;
use support::{Fixture, Hero, Team, Trophy};

fn seed_team(fixture: &Fixture) -> i64 {
    fixture
        .session()
        .run_in_transaction(|session| {
            let mut team = Team::new("Avengers");
            team.heroes.push(Hero::new("Wanda")).unwrap();
            team.heroes.push(Hero::new("Vision")).unwrap();
            team.trophies.push(Trophy::new("cup")).unwrap();
            session.persist(&mut team)?;
            Ok(team.id.unwrap())
        })
        .unwrap()
}

#[test]
fn lazy_association_resolves_while_session_is_open() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();

    let mut team = team.write().unwrap();
    assert!(!team.heroes.is_loaded());
    let heroes = team.heroes.resolve().unwrap();
    assert_eq!(heroes.len(), 2);
    let mut names: Vec<String> = heroes
        .iter()
        .map(|h| h.read().unwrap().name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Vision", "Wanda"]);
}

#[test]
fn lazy_access_after_close_fails_at_first_access() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();

    // Loading succeeded; the failure must happen lazily, at access time.
    session.close().unwrap();

    let mut team = team.write().unwrap();
    let err = team.heroes.resolve().unwrap_err();
    match err {
        Error::LazyInitialization { association, .. } => assert_eq!(association, "heroes"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn lazy_access_after_session_dropped_fails() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let team = {
        let mut session = fixture.session();
        session.find::<Team>(team_id).unwrap().unwrap()
        // Session dropped here without close(); the proxy's weak handle
        // is dead either way.
    };

    let mut team = team.write().unwrap();
    assert!(matches!(
        team.heroes.resolve(),
        Err(Error::LazyInitialization { .. })
    ));
}

#[test]
fn resolution_is_not_retried_through_a_new_session() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();
    session.close().unwrap();

    // A second open session over the same storage does not revive the
    // proxy; re-attachment is an explicit caller action (find again).
    let mut other = fixture.session();
    let _fresh = other.find::<Team>(team_id).unwrap().unwrap();
    let mut team = team.write().unwrap();
    assert!(matches!(
        team.heroes.resolve(),
        Err(Error::LazyInitialization { .. })
    ));
}

#[test]
fn proxy_resolved_before_close_stays_usable_after() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();
    team.write().unwrap().heroes.resolve().unwrap();
    session.close().unwrap();

    // Already materialized: readable after close, including re-resolve.
    let mut team = team.write().unwrap();
    assert_eq!(team.heroes.resolve().unwrap().len(), 2);
    assert_eq!(team.heroes.len(), 2);
}

#[test]
fn eager_association_is_populated_at_load_time() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();
    session.close().unwrap();

    // No access has happened yet, and the session is gone; the eager
    // collection was populated while the owner loaded, so reading it
    // needs no further fetches.
    let team = team.read().unwrap();
    assert!(team.trophies.is_loaded());
    let trophies = team.trophies.get().unwrap();
    assert_eq!(trophies.len(), 1);
    assert_eq!(trophies[0].read().unwrap().title, "cup");
    // The lazy sibling on the same instance is unusable, as expected.
    assert!(!team.heroes.is_loaded());
}

#[test]
fn resolved_children_share_identity_with_direct_lookups() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let team = session.find::<Team>(team_id).unwrap().unwrap();
    let heroes: Vec<_> = {
        let mut team = team.write().unwrap();
        team.heroes.resolve().unwrap().to_vec()
    };

    for hero in &heroes {
        let id = hero.read().unwrap().id.unwrap();
        let direct = session.find::<Hero>(id).unwrap().unwrap();
        assert!(Arc::ptr_eq(hero, &direct));
    }
}

#[test]
fn to_one_proxies_share_one_target_instance() {
    let fixture = Fixture::new();
    let team_id = seed_team(&fixture);

    let mut session = fixture.session();
    let heroes = session.query::<Hero>().all().unwrap();
    assert_eq!(heroes.len(), 2);

    // Both heroes point at the same team row; resolving each proxy
    // yields the identical managed instance.
    let team_a = heroes[0].write().unwrap().team.resolve().unwrap().unwrap();
    let team_b = heroes[1].write().unwrap().team.resolve().unwrap().unwrap();
    assert!(Arc::ptr_eq(&team_a, &team_b));
    assert_eq!(team_a.read().unwrap().id, Some(team_id));
}

#[test]
fn null_to_one_resolves_to_none_without_a_session() {
    let fixture = Fixture::new();
    let hero_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut hero = Hero::new("solo");
            session.persist(&mut hero)?;
            Ok(hero.id.unwrap())
        })
        .unwrap();

    let mut session = fixture.session();
    let hero = session.find::<Hero>(hero_id).unwrap().unwrap();
    session.close().unwrap();

    // NULL foreign key: loaded-as-none, no session needed.
    assert!(hero.write().unwrap().team.resolve().unwrap().is_none());
}
