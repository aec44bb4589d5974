#![allow(clippy::unwrap_used)]

use crossbeam_channel::Receiver;
use glam::{Vec3, vec3};
use net_core::entity::{AnimationSet, AvatarId, AvatarState, EntityGroup, EntityId};
use net_core::flags::UpdateFlags;
use net_core::interest::Culler;
use net_core::notify::{EventBus, WorldEvent};
use net_core::priority::DistancePrioritizer;
use net_core::scan::ScanHandle;
use net_core::transport::{
    AvatarUpdate, ChannelTransport, EntityUpdate, SendError, ViewerMessage, ViewerTransport,
};
use net_core::viewer::{ViewerCfg, ViewerDeps, ViewerPipeline};
use net_core::world::WorldView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const ME: AvatarId = AvatarId(1);

#[derive(Default)]
struct TestWorld {
    groups: Mutex<HashMap<EntityId, Arc<EntityGroup>>>,
    avatars: Mutex<HashMap<AvatarId, AvatarState>>,
}

impl TestWorld {
    fn add_group(&self, g: EntityGroup) -> Arc<EntityGroup> {
        let g = Arc::new(g);
        self.groups.lock().insert(g.id, g.clone());
        g
    }
    fn add_avatar(&self, id: AvatarId, pos: Vec3) {
        self.avatars.lock().insert(id, AvatarState::new(id, pos));
    }
}

impl WorldView for TestWorld {
    fn region_size(&self) -> f32 {
        256.0
    }
    fn groups(&self) -> Vec<Arc<EntityGroup>> {
        let mut v: Vec<_> = self.groups.lock().values().cloned().collect();
        v.sort_by_key(|g| g.id);
        v
    }
    fn group(&self, id: EntityId) -> Option<Arc<EntityGroup>> {
        self.groups.lock().get(&id).cloned()
    }
    fn group_of_part(&self, part: EntityId) -> Option<Arc<EntityGroup>> {
        self.groups.lock().values().find(|g| g.part(part).is_some()).cloned()
    }
    fn avatars(&self) -> Vec<AvatarState> {
        self.avatars.lock().values().cloned().collect()
    }
    fn avatar(&self, id: AvatarId) -> Option<AvatarState> {
        self.avatars.lock().get(&id).cloned()
    }
}

fn cfg() -> ViewerCfg {
    ViewerCfg { warmup_flushes: 0, ..ViewerCfg::default() }
}

fn pipeline_with(
    world: &Arc<TestWorld>,
    transport: Arc<dyn ViewerTransport>,
    cfg: ViewerCfg,
    draw_distance: f32,
) -> Arc<ViewerPipeline> {
    let deps = ViewerDeps {
        world: world.clone(),
        transport,
        culler: Culler { region_size: 256.0, region_view_distance: 0.0, see_into_region: true },
        prioritizer: Arc::new(DistancePrioritizer),
        scans: ScanHandle::inline(),
    };
    ViewerPipeline::new(ME, cfg, deps, draw_distance).unwrap()
}

fn pipeline(world: &Arc<TestWorld>, draw_distance: f32) -> (Arc<ViewerPipeline>, Receiver<ViewerMessage>) {
    let (t, rx) = ChannelTransport::new(256);
    (pipeline_with(world, Arc::new(t), cfg(), draw_distance), rx)
}

fn entity_updates(rx: &Receiver<ViewerMessage>) -> Vec<(EntityId, UpdateFlags)> {
    rx.try_iter()
        .filter_map(|m| match m {
            ViewerMessage::EntityUpdates(u) => Some(u),
            _ => None,
        })
        .flatten()
        .map(|u| (u.part.id, u.flags))
        .collect()
}

#[test]
fn first_update_for_any_part_forces_full_for_every_part() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::with_parts(
        EntityId(10),
        vec3(40.0, 0.0, 0.0),
        &[(EntityId(11), Vec3::X), (EntityId(12), Vec3::Y)],
    ));
    let (v, _rx) = pipeline(&world, 64.0);

    // a child part, before any scan has run
    v.queue_entity_update(EntityId(12), UpdateFlags::POSITION);
    assert!(v.entity_in_view(EntityId(10)));
    for part in [10, 11, 12] {
        assert_eq!(v.pending_entity_flags(EntityId(part)), Some(UpdateFlags::FORCED_FULL));
    }
}

#[test]
fn full_update_is_delivered_before_any_terse_update() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, rx) = pipeline(&world, 64.0);

    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    v.queue_entity_update(EntityId(10), UpdateFlags::ROTATION);
    let r = v.flush(100, 60);
    assert!(r.initial_scan);
    assert_eq!(entity_updates(&rx), vec![(EntityId(10), UpdateFlags::FORCED_FULL)]);

    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    v.flush(100, 60);
    assert_eq!(entity_updates(&rx), vec![(EntityId(10), UpdateFlags::POSITION)]);
}

#[test]
fn repeated_enqueues_merge_into_one_record() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    world.add_group(EntityGroup::single(EntityId(20), vec3(12.0, 0.0, 0.0)));
    let (v, rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    let _ = entity_updates(&rx);

    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    v.queue_entity_update(EntityId(20), UpdateFlags::TEXT);
    v.queue_entity_update(EntityId(10), UpdateFlags::ROTATION);
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert_eq!(v.pending().entities, 2);
    v.flush(100, 60);
    // merged record keeps its original position in line
    assert_eq!(
        entity_updates(&rx),
        vec![
            (EntityId(10), UpdateFlags::POSITION | UpdateFlags::ROTATION),
            (EntityId(20), UpdateFlags::TEXT),
        ]
    );
}

#[test]
fn groups_out_of_range_are_not_queued_until_visible() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(150.0, 0.0, 0.0)));
    let (v, rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert_eq!(v.pending().entities, 0);
    assert!(entity_updates(&rx).is_empty());

    v.on_camera_moved(vec3(120.0, 0.0, 0.0), Vec3::ZERO);
    assert!(v.entity_in_view(EntityId(10)));
    v.flush(100, 60);
    assert_eq!(entity_updates(&rx), vec![(EntityId(10), UpdateFlags::FORCED_FULL)]);
}

#[test]
fn small_camera_moves_do_not_rescan() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let (v, _rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    assert_eq!(v.stats().scans, 1);
    v.on_camera_moved(vec3(3.0, 0.0, 0.0), Vec3::ZERO);
    assert_eq!(v.stats().scans, 1);
    // velocity look-ahead pushes the same position over the threshold
    v.on_camera_moved(vec3(3.0, 0.0, 0.0), vec3(4.0, 0.0, 0.0));
    assert_eq!(v.stats().scans, 2);
}

#[test]
fn warm_up_flushes_send_nothing() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (t, rx) = ChannelTransport::new(64);
    let v = pipeline_with(&world, Arc::new(t), ViewerCfg { warmup_flushes: 3, ..cfg() }, 64.0);
    for _ in 0..3 {
        assert!(v.flush(100, 60).warming_up);
    }
    assert!(rx.is_empty());
    assert_eq!(v.stats().scans, 0);
    let r = v.flush(100, 60);
    assert!(!r.warming_up && r.initial_scan);
    assert_eq!(r.entities, 1);
}

#[test]
fn initial_scan_waits_for_a_draw_distance() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, _rx) = pipeline(&world, 0.0);
    assert!(!v.flush(100, 60).initial_scan);
    v.set_draw_distance(64.0);
    assert!(v.flush(100, 60).initial_scan);
}

#[test]
fn draw_distance_is_clamped() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let (v, _rx) = pipeline(&world, 0.0);
    v.set_draw_distance(10.0);
    assert_eq!(v.draw_distance(), 32.0);
    v.set_draw_distance(10_000.0);
    assert_eq!(v.draw_distance(), 512.0);
    v.set_draw_distance(f32::NAN);
    assert_eq!(v.draw_distance(), 32.0);
    v.close();
}

#[test]
fn budgets_limit_each_drain_independently() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    for i in 0..10 {
        world.add_group(EntityGroup::single(EntityId(100 + i), vec3(i as f32, 0.0, 0.0)));
    }
    for i in 0..4 {
        world.add_avatar(AvatarId(10 + i), vec3(5.0, i as f32, 0.0));
    }
    let (v, rx) = pipeline(&world, 64.0);
    let r = v.flush(4, 2);
    assert_eq!(r.entities, 4);
    assert_eq!(r.avatars_full, 2);
    assert_eq!(v.pending().entities, 6);
    let _ = rx.try_iter().count();

    // properties replies come out of the entity budget
    v.queue_object_properties(EntityId(100));
    v.queue_object_properties(EntityId(101));
    let r = v.flush(4, 2);
    assert_eq!((r.properties, r.entities), (2, 2));
}

#[test]
fn animations_use_what_is_left_of_the_avatar_budget() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(5.0, 0.0, 0.0));
    let (v, rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    let _ = rx.try_iter().count();

    let walk = AnimationSet { anims: vec![(7, 1)] };
    v.queue_animation(AvatarId(2), walk.clone());
    v.queue_animation(ME, walk.clone());
    assert_eq!(v.pending_avatar_flags(AvatarId(2)), Some(UpdateFlags::TERSE));
    // two terse avatar records use the whole budget of two
    let r = v.flush(100, 2);
    assert_eq!((r.avatars_terse, r.animations), (2, 0));
    let r = v.flush(100, 2);
    assert_eq!(r.animations, 2);
    let anims = rx.try_iter().filter(|m| matches!(m, ViewerMessage::Animations(..))).count();
    assert_eq!(anims, 2);
}

#[test]
fn seated_own_avatar_animation_has_no_terse_pairing() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.avatars.lock().get_mut(&ME).unwrap().seated = true;
    let (v, _rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    v.flush(100, 60);
    v.queue_animation(ME, AnimationSet::default());
    assert_eq!(v.pending_avatar_flags(ME), None);
    assert_eq!(v.pending().animations, 1);
}

#[test]
fn new_avatars_get_a_full_snapshot_and_forced_marker() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(20.0, 0.0, 0.0));
    world.add_avatar(AvatarId(3), vec3(200.0, 0.0, 0.0));
    let (v, rx) = pipeline(&world, 64.0);
    v.scan_interest();
    assert!(v.avatar_in_view(ME));
    assert!(v.avatar_in_view(AvatarId(2)));
    assert!(!v.avatar_in_view(AvatarId(3)));
    assert_eq!(v.pending_avatar_flags(AvatarId(2)), Some(UpdateFlags::FORCED_FULL));
    let fulls = rx.try_iter().filter(|m| matches!(m, ViewerMessage::AvatarFull(_))).count();
    assert_eq!(fulls, 2);

    // terse updates for avatars out of view are dropped
    v.queue_avatar_update(AvatarId(3), UpdateFlags::POSITION);
    assert_eq!(v.pending_avatar_flags(AvatarId(3)), None);
}

#[test]
fn disconnect_clears_state_and_ignores_later_enqueues() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(5.0, 0.0, 0.0));
    for i in 0..5 {
        world.add_group(EntityGroup::single(EntityId(100 + i), vec3(i as f32, 0.0, 0.0)));
    }
    let bus = Arc::new(EventBus::new());
    let (v, _rx) = pipeline(&world, 64.0);
    v.attach(&bus);
    v.scan_interest();
    v.queue_animation(AvatarId(2), AnimationSet::default());
    v.queue_animation(AvatarId(2), AnimationSet::default());
    let p = v.pending();
    assert_eq!((p.entities, p.animations), (5, 2));

    bus.publish(&WorldEvent::ClientClosing { avatar: ME });
    assert!(v.is_closed());
    assert!(bus.is_empty());
    assert_eq!(v.pending(), Default::default());

    v.queue_entity_update(EntityId(100), UpdateFlags::POSITION);
    v.queue_animation(AvatarId(2), AnimationSet::default());
    v.queue_avatar_full_update(AvatarId(2), true);
    v.queue_object_properties(EntityId(100));
    v.scan_interest();
    assert_eq!(v.pending(), Default::default());
    assert_eq!(v.flush(100, 60), Default::default());
}

#[test]
fn draw_distance_changes_are_debounced_into_one_scan() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let (t, _rx) = ChannelTransport::new(64);
    let debounce = Duration::from_millis(300);
    let v = pipeline_with(&world, Arc::new(t), ViewerCfg { debounce, ..cfg() }, 0.0);
    let bus = Arc::new(EventBus::new());
    v.attach(&bus);

    bus.publish(&WorldEvent::DrawDistanceChanged { avatar: ME, distance: 100.0 });
    thread::sleep(Duration::from_millis(50));
    bus.publish(&WorldEvent::DrawDistanceChanged { avatar: ME, distance: 200.0 });
    thread::sleep(Duration::from_millis(200));
    assert_eq!(v.stats().scans, 0, "still inside the window after the second change");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(v.stats().scans, 1);
    assert!(!v.camera().force_recheck);
    v.close();
}

/// Loopback whose sends fail per message kind while the matching switch is on.
struct Flaky {
    avatars: AtomicBool,
    entities: AtomicBool,
    properties: AtomicBool,
    animations: AtomicBool,
    inner: ChannelTransport,
}

impl Flaky {
    fn new(inner: ChannelTransport) -> Self {
        Self {
            avatars: AtomicBool::new(false),
            entities: AtomicBool::new(false),
            properties: AtomicBool::new(false),
            animations: AtomicBool::new(false),
            inner,
        }
    }
}

fn failing(switch: &AtomicBool) -> Result<(), SendError> {
    if switch.load(Ordering::SeqCst) { Err(SendError::Full) } else { Ok(()) }
}

impl ViewerTransport for Flaky {
    fn send_entity_updates(&self, u: &[EntityUpdate]) -> Result<(), SendError> {
        failing(&self.entities)?;
        self.inner.send_entity_updates(u)
    }
    fn send_avatar_updates(&self, u: &[AvatarUpdate]) -> Result<(), SendError> {
        failing(&self.avatars).map_err(|_| SendError::Encode("bad avatar".into()))?;
        self.inner.send_avatar_updates(u)
    }
    fn send_avatar_full(&self, a: &AvatarState) -> Result<(), SendError> {
        failing(&self.avatars).map_err(|_| SendError::Disconnected)?;
        self.inner.send_avatar_full(a)
    }
    fn send_animations(&self, a: AvatarId, s: &AnimationSet) -> Result<(), SendError> {
        failing(&self.animations)?;
        self.inner.send_animations(a, s)
    }
    fn send_object_properties(&self, g: &[Arc<EntityGroup>]) -> Result<(), SendError> {
        failing(&self.properties)?;
        self.inner.send_object_properties(g)
    }
    fn send_coarse_locations(&self, p: &[Vec3], ids: &[AvatarId]) -> Result<(), SendError> {
        self.inner.send_coarse_locations(p, ids)
    }
}

fn flaky_pipeline(world: &Arc<TestWorld>) -> (Arc<ViewerPipeline>, Arc<Flaky>, Receiver<ViewerMessage>) {
    let (inner, rx) = ChannelTransport::new(256);
    let t = Arc::new(Flaky::new(inner));
    (pipeline_with(world, t.clone(), cfg(), 64.0), t, rx)
}

#[test]
fn failed_batch_is_requeued_and_later_stages_still_run() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(5.0, 0.0, 0.0));
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, t, rx) = flaky_pipeline(&world);
    v.scan_interest();
    t.avatars.store(true, Ordering::SeqCst);

    let r = v.flush(100, 60);
    assert_eq!(r.failures, 1);
    assert_eq!(r.avatars_full, 0);
    assert_eq!(r.entities, 1);
    assert_eq!(v.pending().avatars, 2);
    assert_eq!(v.pending_avatar_flags(AvatarId(2)), Some(UpdateFlags::FORCED_FULL));
    assert_eq!(v.stats().batch_failures, 1);

    t.avatars.store(false, Ordering::SeqCst);
    let r = v.flush(100, 60);
    assert_eq!((r.failures, r.avatars_full), (0, 2));
    assert_eq!(v.pending().avatars, 0);
    let _ = rx.try_iter().count();
}

#[test]
fn failed_entity_batch_is_requeued_in_order_and_stays_forced() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::with_parts(
        EntityId(10),
        vec3(10.0, 0.0, 0.0),
        &[(EntityId(11), Vec3::X), (EntityId(12), Vec3::Y)],
    ));
    world.add_group(EntityGroup::single(EntityId(20), vec3(20.0, 0.0, 0.0)));
    let (v, t, rx) = flaky_pipeline(&world);
    t.entities.store(true, Ordering::SeqCst);

    let r = v.flush(100, 60);
    assert_eq!((r.entities, r.failures), (0, 1));
    assert_eq!(v.pending().entities, 4);

    // a later motion update folds into the requeued record
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert_eq!(v.pending().entities, 4);
    assert_eq!(v.pending_entity_flags(EntityId(10)), Some(UpdateFlags::FORCED_FULL));

    t.entities.store(false, Ordering::SeqCst);
    let r = v.flush(100, 60);
    assert_eq!((r.entities, r.failures), (4, 0));
    let ff = UpdateFlags::FORCED_FULL;
    assert_eq!(
        entity_updates(&rx),
        vec![(EntityId(10), ff), (EntityId(11), ff), (EntityId(12), ff), (EntityId(20), ff)]
    );
}

#[test]
fn failed_properties_batch_is_delivered_on_the_next_flush() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, t, rx) = flaky_pipeline(&world);
    v.flush(100, 60);
    let _ = rx.try_iter().count();

    t.properties.store(true, Ordering::SeqCst);
    v.queue_object_properties(EntityId(10));
    let r = v.flush(100, 60);
    assert_eq!((r.properties, r.failures), (0, 1));
    assert_eq!(v.pending().properties, 1);

    t.properties.store(false, Ordering::SeqCst);
    let r = v.flush(100, 60);
    assert_eq!((r.properties, r.failures), (1, 0));
    let replies: Vec<EntityId> = rx
        .try_iter()
        .filter_map(|m| match m {
            ViewerMessage::ObjectProperties(g) => Some(g),
            _ => None,
        })
        .flatten()
        .map(|g| g.id)
        .collect();
    assert_eq!(replies, vec![EntityId(10)]);
}

#[test]
fn failed_animation_batch_is_dropped_not_retried() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(5.0, 0.0, 0.0));
    let (v, t, rx) = flaky_pipeline(&world);
    v.flush(100, 60);
    let _ = rx.try_iter().count();

    t.animations.store(true, Ordering::SeqCst);
    v.queue_animation(AvatarId(2), AnimationSet { anims: vec![(7, 1)] });
    v.queue_animation(AvatarId(2), AnimationSet { anims: vec![(8, 2)] });
    let r = v.flush(100, 60);
    assert_eq!((r.animations, r.failures, r.avatars_terse), (0, 1, 1));
    assert_eq!(v.pending().animations, 0);

    t.animations.store(false, Ordering::SeqCst);
    assert_eq!(v.flush(100, 60).animations, 0);
    assert!(!rx.try_iter().any(|m| matches!(m, ViewerMessage::Animations(..))));
}

#[test]
fn groups_leaving_the_draw_distance_stop_streaming_until_they_return() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let g = world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    assert_eq!(entity_updates(&rx), vec![(EntityId(10), UpdateFlags::FORCED_FULL)]);
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert_eq!(v.pending_entity_flags(EntityId(10)), Some(UpdateFlags::POSITION));

    world.add_group(EntityGroup { position: vec3(250.0, 0.0, 250.0), ..(*g).clone() });
    for _ in 0..3 {
        v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
        assert!(!v.entity_in_view(EntityId(10)));
        assert_eq!(v.pending_entity_flags(EntityId(10)), None);
        v.flush(100, 60);
    }
    assert!(entity_updates(&rx).is_empty());

    world.add_group(EntityGroup { position: vec3(20.0, 0.0, 0.0), ..(*g).clone() });
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert_eq!(v.pending_entity_flags(EntityId(10)), Some(UpdateFlags::FORCED_FULL));
}

#[test]
fn avatars_leaving_the_draw_distance_leave_the_view() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_avatar(AvatarId(2), vec3(20.0, 0.0, 0.0));
    let (v, _rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    v.queue_avatar_update(AvatarId(2), UpdateFlags::POSITION);
    assert_eq!(v.pending_avatar_flags(AvatarId(2)), Some(UpdateFlags::POSITION));

    world.avatars.lock().get_mut(&AvatarId(2)).unwrap().position = vec3(300.0, 0.0, 0.0);
    v.queue_avatar_update(AvatarId(2), UpdateFlags::POSITION);
    assert!(!v.avatar_in_view(AvatarId(2)));
    assert_eq!(v.pending_avatar_flags(AvatarId(2)), None);

    // the viewer's own avatar never leaves
    v.queue_avatar_update(ME, UpdateFlags::POSITION);
    assert!(v.avatar_in_view(ME));
    assert_eq!(v.pending_avatar_flags(ME), Some(UpdateFlags::POSITION));
}

#[test]
fn scan_sends_nearest_group_first_with_its_root_part_leading() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::with_parts(EntityId(1), vec3(40.0, 0.0, 0.0), &[(EntityId(2), Vec3::X)]));
    world.add_group(EntityGroup::with_parts(
        EntityId(5),
        vec3(8.0, 0.0, 0.0),
        &[(EntityId(6), Vec3::X), (EntityId(7), Vec3::Y)],
    ));
    let (v, rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    let ids: Vec<u32> = entity_updates(&rx).into_iter().map(|(id, _)| id.0).collect();
    assert_eq!(ids, vec![5, 6, 7, 1, 2]);
}

#[test]
fn concurrent_first_flushes_run_one_initial_scan() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, _rx) = pipeline(&world, 64.0);
    let gate = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (v, gate) = (v.clone(), gate.clone());
            thread::spawn(move || {
                gate.wait();
                v.flush(100, 60).initial_scan
            })
        })
        .collect();
    let scans = handles.into_iter().map(|h| h.join().unwrap()).filter(|s| *s).count();
    assert_eq!(scans, 1);
    assert_eq!(v.stats().scans, 1);
}

#[test]
fn deleted_groups_leave_the_interest_set_and_are_not_sent() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let g = world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, rx) = pipeline(&world, 64.0);
    v.scan_interest();
    world.add_group(EntityGroup { deleted: true, ..(*g).clone() });
    v.flush(100, 60);
    assert!(entity_updates(&rx).is_empty());
    v.queue_entity_update(EntityId(10), UpdateFlags::POSITION);
    assert!(!v.entity_in_view(EntityId(10)));
}

#[test]
fn non_flag_updates_bump_the_cache_serial() {
    let world = Arc::new(TestWorld::default());
    world.add_avatar(ME, Vec3::ZERO);
    let g = world.add_group(EntityGroup::single(EntityId(10), vec3(10.0, 0.0, 0.0)));
    let (v, _rx) = pipeline(&world, 64.0);
    v.flush(100, 60);
    assert_eq!(g.root().cache_serial(), 1);
    v.queue_entity_update(EntityId(10), UpdateFlags::FLAGS);
    v.flush(100, 60);
    assert_eq!(g.root().cache_serial(), 1);
    v.queue_entity_update(EntityId(10), UpdateFlags::TEXT);
    v.flush(100, 60);
    assert_eq!(g.root().cache_serial(), 2);
}
