//! Cascade behavior: persist-by-reachability, opt-in remove.

mod support;

use entman::{ManagedState, Value};
use support::{Armory, Fixture, Gadget, Hero, Power, Team, Trophy};

#[test]
fn persisting_root_cascades_to_children_in_one_unit_of_work() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    let mut team = Team::new("Avengers");
    let wanda = team.heroes.push(Hero::new("Wanda")).unwrap();
    let vision = team.heroes.push(Hero::new("Vision")).unwrap();
    let pietro = team.heroes.push(Hero::new("Pietro")).unwrap();

    session.persist(&mut team).unwrap();

    // All reachable children became managed with assigned keys.
    for hero in [&wanda, &vision, &pietro] {
        let hero = hero.read().unwrap();
        assert!(hero.id.is_some());
        assert!(session.contains(&*hero).unwrap());
        assert_eq!(session.state_of(&*hero).unwrap(), Some(ManagedState::Managed));
    }
    session.commit().unwrap();
    session.close().unwrap();

    assert_eq!(fixture.storage.row_count("hero"), 3);
}

#[test]
fn cascaded_children_reference_the_parent_key() {
    let fixture = Fixture::new();

    let team_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut team = Team::new("Avengers");
            for name in ["a", "b", "c"] {
                team.heroes.push(Hero::new(name)).unwrap();
            }
            session.persist(&mut team)?;
            Ok(team.id.unwrap())
        })
        .unwrap();

    let mut session = fixture.session();
    let children = session
        .query::<Hero>()
        .filter("team_id", team_id)
        .all()
        .unwrap();
    assert_eq!(children.len(), 3);
    for child in &children {
        assert_eq!(child.read().unwrap().team.fk_value(), Value::BigInt(team_id));
    }
}

#[test]
fn cascade_walk_survives_shared_children() {
    let fixture = Fixture::new();
    let mut session = fixture.session();

    // Two teams staging the same hero instance: the second walk must
    // treat the revisit as a no-op instead of inserting twice.
    let mut team_a = Team::new("A");
    let shared = team_a.heroes.push(Hero::new("shared")).unwrap();

    session.persist(&mut team_a).unwrap();
    let shared_id = shared.read().unwrap().id.unwrap();

    let mut team_b = Team::new("B");
    // Reuse the already-persisted hero in another graph.
    team_b.heroes = entman::LazyMany::loaded(vec![shared.clone()]);
    session.persist(&mut team_b).unwrap();

    session.commit().unwrap();
    session.close().unwrap();

    assert_eq!(fixture.storage.row_count("hero"), 1);
    let mut check = fixture.session();
    let hero = check.find::<Hero>(shared_id).unwrap().unwrap();
    assert_eq!(hero.read().unwrap().name, "shared");
}

#[test]
fn join_table_cascade_writes_links_and_sequence_keys() {
    let fixture = Fixture::new();

    let hero_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut hero = Hero::new("Strange");
            hero.powers.push(Power::new("levitation")).unwrap();
            hero.powers.push(Power::new("time loop")).unwrap();
            session.persist(&mut hero)?;
            Ok(hero.id.unwrap())
        })
        .unwrap();

    assert_eq!(fixture.storage.row_count("power"), 2);
    assert_eq!(fixture.storage.row_count("hero_power"), 2);

    let mut session = fixture.session();
    let hero = session.find::<Hero>(hero_id).unwrap().unwrap();
    let mut hero = hero.write().unwrap();
    let powers = hero.powers.resolve().unwrap();
    assert_eq!(powers.len(), 2);
    // Sequence strategy: keys pre-fetched from the counter, starting at 1.
    let mut ids: Vec<i64> = powers
        .iter()
        .map(|p| p.read().unwrap().id.unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn removing_root_preserves_persist_only_children() {
    let fixture = Fixture::new();

    let team_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut team = Team::new("Avengers");
            team.heroes.push(Hero::new("kept")).unwrap();
            team.trophies.push(Trophy::new("cup")).unwrap();
            session.persist(&mut team)?;
            Ok(team.id.unwrap())
        })
        .unwrap();

    fixture
        .session()
        .run_in_transaction(|session| {
            let team = session.find::<Team>(team_id)?.unwrap();
            let snapshot = team.read().unwrap().clone();
            session.remove(&snapshot)
        })
        .unwrap();

    // Remove is not cascaded: sub-entity rows remain.
    assert_eq!(fixture.storage.row_count("team"), 0);
    assert_eq!(fixture.storage.row_count("hero"), 1);
    assert_eq!(fixture.storage.row_count("trophy"), 1);

    let mut session = fixture.session();
    assert!(session.query::<Team>().all().unwrap().is_empty());
    assert_eq!(session.query::<Hero>().all().unwrap().len(), 1);
    assert_eq!(session.query::<Trophy>().all().unwrap().len(), 1);
}

#[test]
fn cascade_remove_is_opt_in() {
    let fixture = Fixture::new();

    let armory_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut armory = Armory::new("basement");
            armory.gadgets.push(Gadget::new("grapple")).unwrap();
            armory.gadgets.push(Gadget::new("emp")).unwrap();
            session.persist(&mut armory)?;
            Ok(armory.id.unwrap())
        })
        .unwrap();
    assert_eq!(fixture.storage.row_count("gadget"), 2);

    fixture
        .session()
        .run_in_transaction(|session| {
            let armory = session.find::<Armory>(armory_id)?.unwrap();
            let snapshot = armory.read().unwrap().clone();
            session.remove(&snapshot)
        })
        .unwrap();

    // Cascade `All` includes remove: the gadget rows go with the root.
    assert_eq!(fixture.storage.row_count("armory"), 0);
    assert_eq!(fixture.storage.row_count("gadget"), 0);
}

#[test]
fn removing_hero_cleans_its_link_rows_but_keeps_powers() {
    let fixture = Fixture::new();

    let hero_id = fixture
        .session()
        .run_in_transaction(|session| {
            let mut hero = Hero::new("Strange");
            hero.powers.push(Power::new("levitation")).unwrap();
            session.persist(&mut hero)?;
            Ok(hero.id.unwrap())
        })
        .unwrap();

    fixture
        .session()
        .run_in_transaction(|session| {
            let hero = session.find::<Hero>(hero_id)?.unwrap();
            let snapshot = hero.read().unwrap().clone();
            session.remove(&snapshot)
        })
        .unwrap();

    // Link rows belong to the association and are cleaned up; the
    // power rows survive a persist-only cascade.
    assert_eq!(fixture.storage.row_count("hero"), 0);
    assert_eq!(fixture.storage.row_count("hero_power"), 0);
    assert_eq!(fixture.storage.row_count("power"), 1);
}
