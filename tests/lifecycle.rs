#![cfg(not(loom))]

use entity_sections::{
    Aabb, Config, DVec3, Entity, EntityEventKind, EntityId, EntityManager, EntityStore, Geometry,
    MemoryStore, RegionPos, RegionStatus, RemovalReason, SectionPos, Uuid, Visibility,
};
use EntityEventKind::*;

type Manager = EntityManager<&'static str, MemoryStore<&'static str>>;

fn manager() -> Manager {
    EntityManager::new(MemoryStore::new().unwrap(), Config::default())
}

fn kinds<T: Clone, S: EntityStore<T>>(manager: &mut EntityManager<T, S>) -> Vec<EntityEventKind> {
    manager.drain_events().map(|event| event.kind).collect()
}

fn spawn(manager: &mut Manager, position: DVec3) -> EntityId {
    let entity = Entity::with_random_uuid(position, "mob");
    let uuid = entity.uuid();
    assert!(manager.add_new(entity));
    manager.entity_id(uuid).unwrap()
}

fn assert_sections_consistent(manager: &Manager, ids: &[EntityId]) {
    let geometry = manager.config().geometry;
    let mut filed = 0;
    for (_, section) in manager.index().iter() {
        assert!(!section.is_empty());
        filed += section.len();
    }
    assert_eq!(filed, manager.entity_count());

    for &id in ids {
        if let Some(entity) = manager.get(id) {
            let pos = geometry.section_of(entity.position());
            assert_eq!(manager.section_of(id), Some(pos));
            assert!(manager.section(pos).unwrap().contains(id));
        }
    }
}

#[test]
fn region_lifecycle_scenario() {
    let mut manager = manager();
    let region = RegionPos::new(0, 0);

    let e1 = Entity::with_random_uuid(DVec3::new(5.0, 5.0, 5.0), "e1");
    let uuid = e1.uuid();
    assert!(manager.add_new(e1));
    let id = manager.entity_id(uuid).unwrap();

    assert!(!manager.is_tracked(id));
    assert!(!manager.is_ticking(id));
    assert_eq!(kinds(&mut manager), vec![Created]);

    manager.update_region_visibility(region, Visibility::Ticking);
    assert_eq!(kinds(&mut manager), vec![TrackingStart, TickingStart]);
    assert!(manager.ticking().contains(id));

    assert!(manager.set_position(id, DVec3::new(20.0, 20.0, 5.0)));
    assert_eq!(kinds(&mut manager), vec![SectionChange]);
    assert_eq!(manager.section_of(id), Some(SectionPos::new(1, 1, 0)));
    assert!(manager.section(SectionPos::new(0, 0, 0)).is_none());

    // Let the load requested by the region turning visible land.
    manager.store().flush(true).unwrap();
    manager.tick();
    assert!(manager.are_entities_loaded(region));

    manager.update_region_visibility(region, Visibility::Hidden);
    assert_eq!(kinds(&mut manager), vec![TickingEnd, TrackingEnd]);
    assert!(manager.is_loaded(uuid));

    manager.tick();
    assert!(!manager.is_loaded(uuid));
    assert_eq!(manager.entity_count(), 0);
    assert!(kinds(&mut manager).is_empty());

    manager.store().flush(true).unwrap();
    let stored = manager.store().stored(region).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].uuid(), uuid);
    assert_eq!(stored[0].position(), DVec3::new(20.0, 20.0, 5.0));
}

#[test]
fn duplicate_uuid_is_rejected() {
    let mut manager = manager();
    let uuid = Uuid::new_v4();

    assert!(manager.add_new(Entity::new(uuid, DVec3::ZERO, "first")));
    assert!(!manager.add_new(Entity::new(uuid, DVec3::new(100.0, 0.0, 0.0), "second")));
    assert!(!manager.add_from_storage(Entity::new(uuid, DVec3::ZERO, "third")));

    assert_eq!(manager.entity_count(), 1);
    assert_eq!(kinds(&mut manager), vec![Created]);
    let id = manager.entity_id(uuid).unwrap();
    assert_eq!(*manager.get(id).unwrap().data(), "first");
    assert_eq!(manager.index().len(), 1);
}

#[test]
fn bulk_inserts_do_not_announce_creation() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Tracked);

    manager.add_world_gen(vec![
        Entity::with_random_uuid(DVec3::ZERO, "a"),
        Entity::with_random_uuid(DVec3::ONE, "b"),
    ]);
    manager.add_legacy(vec![Entity::with_random_uuid(DVec3::ONE, "c")]);

    assert_eq!(manager.entity_count(), 3);
    assert_eq!(kinds(&mut manager), vec![TrackingStart; 3]);
}

#[test]
fn sections_follow_positions() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);

    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(spawn(&mut manager, DVec3::new(i as f64 * 7.0, 0.0, -(i as f64) * 3.0)));
    }
    assert_sections_consistent(&manager, &ids);

    for step in 0..40u32 {
        let id = ids[(step as usize * 5) % ids.len()];
        let x = ((step * 37) % 150) as f64 - 75.0;
        let y = ((step * 11) % 40) as f64 - 20.0;
        let z = ((step * 53) % 130) as f64 - 65.0;
        assert!(manager.set_position(id, DVec3::new(x, y, z)));
        assert_sections_consistent(&manager, &ids);

        if step % 9 == 8 {
            let removed = ids.remove(step as usize % ids.len());
            assert!(manager.remove(removed, RemovalReason::Discarded).is_some());
            assert_sections_consistent(&manager, &ids);
        }
    }
}

#[test]
fn moving_within_a_section_is_silent() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);
    let id = spawn(&mut manager, DVec3::new(1.0, 1.0, 1.0));
    kinds(&mut manager);

    assert!(manager.set_position(id, DVec3::new(15.9, 0.0, 15.9)));
    assert!(kinds(&mut manager).is_empty());
    assert_eq!(manager.get(id).unwrap().position(), DVec3::new(15.9, 0.0, 15.9));

    assert!(!manager.set_position(EntityId(999), DVec3::ZERO));
}

#[test]
fn crossing_region_boundaries_changes_visibility() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);
    manager.update_region_visibility(RegionPos::new(1, 0), Visibility::Tracked);

    let id = spawn(&mut manager, DVec3::new(5.0, 5.0, 5.0));
    assert_eq!(kinds(&mut manager), vec![Created, TrackingStart, TickingStart]);

    manager.set_position(id, DVec3::new(70.0, 5.0, 5.0));
    assert_eq!(kinds(&mut manager), vec![TickingEnd]);
    assert!(manager.is_tracked(id));

    manager.set_position(id, DVec3::new(200.0, 5.0, 5.0));
    assert_eq!(kinds(&mut manager), vec![TrackingEnd]);
    assert!(!manager.is_tracked(id));

    manager.set_position(id, DVec3::new(5.0, 5.0, 5.0));
    assert_eq!(kinds(&mut manager), vec![TrackingStart, TickingStart]);
}

#[test]
fn always_active_entities_keep_ticking() {
    let mut manager = manager();
    let region = RegionPos::new(0, 0);

    let player = Entity::with_random_uuid(DVec3::new(3.0, 64.0, 3.0), "player")
        .always_active(true)
        .persistable(false);
    let uuid = player.uuid();
    assert!(manager.add_new(player));
    let id = manager.entity_id(uuid).unwrap();
    assert_eq!(kinds(&mut manager), vec![Created, TrackingStart, TickingStart]);

    manager.update_region_visibility(region, Visibility::Ticking);
    manager.update_region_visibility(region, Visibility::Tracked);
    manager.update_region_visibility(region, Visibility::Hidden);
    manager.tick();
    assert!(kinds(&mut manager).is_empty());
    assert!(manager.is_ticking(id));

    manager.set_position(id, DVec3::new(-5000.0, 0.0, 9000.0));
    assert_eq!(kinds(&mut manager), vec![SectionChange]);
    assert!(manager.is_ticking(id));
    assert!(manager.is_loaded(uuid));
}

#[test]
fn removal_ends_tracking_before_destroying() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);

    let id = spawn(&mut manager, DVec3::new(1.0, 2.0, 3.0));
    let uuid = manager.get(id).unwrap().uuid();
    kinds(&mut manager);

    let entity = manager.remove(id, RemovalReason::Killed).unwrap();
    assert_eq!(entity.uuid(), uuid);
    assert_eq!(kinds(&mut manager), vec![TickingEnd, TrackingEnd, Destroyed]);
    assert!(!manager.is_loaded(uuid));
    assert!(manager.section(SectionPos::new(0, 0, 0)).is_none());
    assert!(manager.remove(id, RemovalReason::Killed).is_none());

    // The id is handed out again.
    let next = spawn(&mut manager, DVec3::ZERO);
    assert_eq!(next, id);

    manager.remove(next, RemovalReason::ChangedDimension);
    assert_eq!(
        kinds(&mut manager),
        vec![Created, TrackingStart, TickingStart, TickingEnd, TrackingEnd]
    );
}

#[test]
fn tracking_callbacks_are_paired() {
    let mut manager = manager();
    let regions = [RegionPos::new(0, 0), RegionPos::new(1, 0)];
    let tiers = [Visibility::Hidden, Visibility::Tracked, Visibility::Ticking];

    let ids: Vec<_> = (0..6)
        .map(|i| spawn(&mut manager, DVec3::new(i as f64 * 25.0, 0.0, 0.0)))
        .collect();

    let mut tracking = 0i64;
    let mut ticking = 0i64;
    for step in 0..30usize {
        manager.update_region_visibility(regions[step % 2], tiers[(step * 7) % 3]);
        if step % 4 == 0 {
            let id = ids[step % ids.len()];
            manager.set_position(id, DVec3::new((step * 13 % 128) as f64, 0.0, 0.0));
        }

        for kind in kinds(&mut manager) {
            match kind {
                TrackingStart => tracking += 1,
                TrackingEnd => tracking -= 1,
                TickingStart => ticking += 1,
                TickingEnd => ticking -= 1,
                _ => {}
            }
            assert!(tracking >= 0 && ticking >= 0 && ticking <= tracking);
        }
        assert_eq!(tracking as usize, manager.visible_ids().count());
        assert_eq!(ticking as usize, manager.ticking().len());
    }
}

#[test]
fn box_queries_only_see_tracked_entities() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Tracked);

    let near = spawn(&mut manager, DVec3::new(10.0, 0.0, 10.0));
    let far = spawn(&mut manager, DVec3::new(40.0, 0.0, 40.0));
    let hidden = spawn(&mut manager, DVec3::new(70.0, 0.0, 10.0));

    let mut found = Vec::new();
    let aabb = Aabb::new(DVec3::new(0.0, -5.0, 0.0), DVec3::new(80.0, 5.0, 20.0));
    manager.entities_in_box(&aabb, |entity| found.push(entity.id()));

    assert_eq!(found, vec![near]);
    assert!(manager.visible(far).is_some());
    assert!(manager.visible(hidden).is_none());
    let hidden_uuid = manager.get(hidden).unwrap().uuid();
    assert!(manager.visible_by_uuid(hidden_uuid).is_none());
}

#[test]
fn region_status_maps_to_visibility() {
    let mut manager = manager();
    let region = RegionPos::new(-1, 2);

    manager.update_region_status(region, RegionStatus::Border);
    assert_eq!(manager.region_visibility(region), Visibility::Tracked);
    assert!(!manager.can_region_tick(region));

    manager.update_region_status(region, RegionStatus::EntityTicking);
    assert!(manager.can_region_tick(region));
    assert!(manager.can_tick(DVec3::new(-1.0, 300.0, 130.0)));
    assert!(!manager.can_tick(DVec3::new(1.0, 300.0, 130.0)));

    manager.update_region_status(region, RegionStatus::Inaccessible);
    assert_eq!(manager.region_visibility(region), Visibility::Hidden);
}

#[test]
fn custom_geometry() {
    let config = Config::new().with_geometry(Geometry {
        section_shift: 3,
        region_shift: 0,
    });
    let mut manager: Manager = EntityManager::new(MemoryStore::new().unwrap(), config);
    manager.update_region_visibility(RegionPos::new(1, 0), Visibility::Ticking);

    let id = spawn(&mut manager, DVec3::new(9.0, 0.0, 0.0));
    assert_eq!(manager.section_of(id), Some(SectionPos::new(1, 0, 0)));
    assert!(manager.is_ticking(id));
}

#[test]
fn diagnostics() {
    let mut manager = manager();
    manager.store().hold_loads();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);
    spawn(&mut manager, DVec3::new(1.0, 1.0, 1.0));
    spawn(&mut manager, DVec3::new(2.0, 1.0, 1.0));
    spawn(&mut manager, DVec3::new(-1.0, 17.0, 1.0));

    let mut out = Vec::new();
    manager.dump_sections(&mut out).unwrap();
    let csv = String::from_utf8(out).unwrap();
    assert_eq!(
        csv,
        "x,y,z,visibility,load_status,entity_count\n\
         -1,1,0,HIDDEN,FRESH,1\n\
         0,0,0,TICKING,PENDING,2\n"
    );

    assert_eq!(manager.gather_stats(), "2,2,2,1,1,0,0");
}

#[test]
fn close_ends_tracking_of_resident_entities() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);
    manager.update_region_visibility(RegionPos::new(1, 0), Visibility::Tracked);
    let ticking = spawn(&mut manager, DVec3::new(1.0, 0.0, 1.0));
    let tracked = spawn(&mut manager, DVec3::new(70.0, 0.0, 1.0));
    let keeper = manager.add_new(
        Entity::with_random_uuid(DVec3::new(2.0, 0.0, 2.0), "marker").persistable(false),
    );
    assert!(keeper);
    manager.drain_events().for_each(drop);

    manager.close().unwrap();

    let events: Vec<_> = manager.drain_events().collect();
    let for_id = |id: EntityId| {
        events
            .iter()
            .filter(|event| event.id == id)
            .map(|event| event.kind)
            .collect::<Vec<_>>()
    };
    assert_eq!(for_id(ticking), vec![TickingEnd, TrackingEnd]);
    assert_eq!(for_id(tracked), vec![TrackingEnd]);
    assert_eq!(manager.visible_ids().count(), 0);
    assert!(manager.ticking().is_empty());
}

#[test]
fn each_section_migration_is_reported() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Tracked);
    let id = spawn(&mut manager, DVec3::new(1.0, 0.0, 1.0));
    manager.drain_events().for_each(drop);

    manager.set_position(id, DVec3::new(17.0, 0.0, 1.0));
    manager.set_position(id, DVec3::new(33.0, 0.0, 1.0));

    assert_eq!(kinds(&mut manager), vec![SectionChange, SectionChange]);
}

#[test]
fn huge_box_queries_visit_existing_sections() {
    let mut manager = manager();
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Tracked);
    manager.update_region_visibility(RegionPos::new(-5, 3), Visibility::Tracked);
    let near = spawn(&mut manager, DVec3::new(10.0, 0.0, 10.0));
    let far = spawn(&mut manager, DVec3::new(-300.0, 1000.0, 200.0));
    spawn(&mut manager, DVec3::new(5000.0, 0.0, 0.0));

    let mut found = Vec::new();
    let aabb = Aabb::new(DVec3::splat(-1.0e9), DVec3::splat(1.0e9));
    manager.entities_in_box(&aabb, |entity| found.push(entity.id()));
    found.sort();

    assert_eq!(found, vec![near, far]);
}

#[test]
fn oversized_geometry_shifts_are_clamped() {
    let config = Config::new().with_geometry(Geometry {
        section_shift: 40,
        region_shift: 40,
    });
    let mut manager: Manager = EntityManager::new(MemoryStore::new().unwrap(), config);
    manager.update_region_visibility(RegionPos::new(0, 0), Visibility::Ticking);

    let id = spawn(&mut manager, DVec3::new(1.0e6, 5.0, 3.0));
    assert_eq!(manager.section_of(id), Some(SectionPos::new(0, 0, 0)));
    assert!(manager.is_ticking(id));
}
