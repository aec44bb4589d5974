//! Per-viewer update pipeline.
//!
//! One pipeline per connected avatar. The enqueue side is called from any
//! thread reacting to world changes; the drain side (`flush`) is called once
//! per pump tick with a budget. Each queue and interest set sits behind its
//! own lock, and no lock is held across a transport call.
//!
//! Invariant: a group's first update to this viewer carries `FORCED`. The
//! group id enters `entities_in_view` in the same critical section that
//! queues forced-full records for all of its parts.
//!
//! A batch the transport rejects goes back to the front of its queue and is
//! retried on the next flush, merged with anything queued meanwhile.
//! Animation notices are the exception: they are one-shot and dropped.
//!
//! Lock order when nesting: `entity_updates` -> `entities_in_view`.

use crate::debounce::Debouncer;
use crate::entity::{AnimationSet, AvatarId, EntityGroup, EntityId};
use crate::flags::UpdateFlags;
use crate::interest::{Culler, ViewerFrame};
use crate::notify::{EventBus, SubscriberId, WorldEvent, WorldObserver};
use crate::priority::{Prioritizer, order_groups};
use crate::queue::UpdateQueue;
use crate::scan::ScanHandle;
use crate::transport::{AvatarUpdate, EntityUpdate, SendError, ViewerTransport};
use crate::world::WorldView;
use glam::Vec3;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Seconds of velocity look-ahead applied to the camera before testing the
/// movement threshold.
pub const MOVE_LOOKAHEAD_S: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct ViewerCfg {
    /// Pump calls to ignore after connecting.
    pub warmup_flushes: u32,
    pub debounce: Duration,
    /// Squared camera travel that triggers a rescan.
    pub move_threshold_sq: f32,
    pub min_draw_distance: f32,
    pub max_draw_distance: f32,
}

impl Default for ViewerCfg {
    fn default() -> Self {
        Self {
            warmup_flushes: 30,
            debounce: Duration::from_millis(3000),
            move_threshold_sq: 16.0,
            min_draw_distance: 32.0,
            max_draw_distance: 512.0,
        }
    }
}

/// Collaborators a pipeline talks to.
pub struct ViewerDeps {
    pub world: Arc<dyn WorldView>,
    pub transport: Arc<dyn ViewerTransport>,
    pub culler: Culler,
    pub prioritizer: Arc<dyn Prioritizer>,
    pub scans: ScanHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct CameraState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Zero until the viewer reports one.
    pub draw_distance: f32,
    pub last_scan_position: Option<Vec3>,
    pub force_recheck: bool,
}

#[derive(Debug, Clone)]
struct EntityRecord {
    group: Arc<EntityGroup>,
    flags: UpdateFlags,
}

fn merge_record(pending: &mut EntityRecord, new: EntityRecord) -> bool {
    let merged = pending.flags.merge(new.flags);
    let changed = merged != pending.flags;
    pending.flags = merged;
    changed
}

fn merge_flags(pending: &mut UpdateFlags, new: UpdateFlags) -> bool {
    let merged = pending.merge(new);
    let changed = merged != *pending;
    *pending = merged;
    changed
}

/// What one `flush` call delivered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub warming_up: bool,
    pub initial_scan: bool,
    pub avatars_full: usize,
    pub avatars_terse: usize,
    pub animations: usize,
    pub properties: usize,
    pub entities: usize,
    pub failures: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ViewerStats {
    pub scans: u64,
    pub entities_sent: u64,
    pub avatars_sent: u64,
    pub animations_sent: u64,
    pub properties_sent: u64,
    pub batch_failures: u64,
}

/// Sizes of every retained collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub entities: usize,
    pub avatars: usize,
    pub animations: usize,
    pub properties: usize,
    pub entities_in_view: usize,
    pub avatars_in_view: usize,
}

#[derive(Default)]
struct Counters {
    scans: AtomicU64,
    entities_sent: AtomicU64,
    avatars_sent: AtomicU64,
    animations_sent: AtomicU64,
    properties_sent: AtomicU64,
    batch_failures: AtomicU64,
}

pub struct ViewerPipeline {
    me: Weak<ViewerPipeline>,
    avatar: AvatarId,
    cfg: ViewerCfg,
    world: Arc<dyn WorldView>,
    transport: Arc<dyn ViewerTransport>,
    culler: Culler,
    prioritizer: Arc<dyn Prioritizer>,
    scans: ScanHandle,

    entity_updates: Mutex<UpdateQueue<EntityId, EntityRecord>>,
    avatar_updates: Mutex<UpdateQueue<AvatarId, UpdateFlags>>,
    animations: Mutex<VecDeque<(AvatarId, AnimationSet)>>,
    properties: Mutex<UpdateQueue<EntityId, ()>>,
    entities_in_view: Mutex<HashSet<EntityId>>,
    avatars_in_view: Mutex<HashSet<AvatarId>>,
    camera: Mutex<CameraState>,
    debounce: Debouncer,
    subscription: Mutex<Option<(Weak<EventBus>, SubscriberId)>>,

    flush_calls: AtomicU32,
    initial_scan_done: AtomicBool,
    scan_pending: AtomicBool,
    closed: AtomicBool,
    counters: Counters,
}

impl ViewerPipeline {
    /// Build a pipeline for `avatar`. `draw_distance` is the value reported at
    /// connect time; zero means unknown and postpones the initial scan.
    pub fn new(
        avatar: AvatarId,
        cfg: ViewerCfg,
        deps: ViewerDeps,
        draw_distance: f32,
    ) -> std::io::Result<Arc<Self>> {
        let slot: Arc<OnceLock<Weak<ViewerPipeline>>> = Arc::new(OnceLock::new());
        let fired = slot.clone();
        let debounce = Debouncer::spawn(&format!("viewer-{}-debounce", avatar.0), move || {
            if let Some(v) = fired.get().and_then(Weak::upgrade) {
                v.on_debounce_fired();
            }
        })?;
        let position = deps.world.avatar(avatar).map_or(Vec3::ZERO, |a| a.position);
        let draw_distance = if draw_distance > 0.0 {
            draw_distance.clamp(cfg.min_draw_distance, cfg.max_draw_distance.max(cfg.min_draw_distance))
        } else {
            0.0
        };
        let pipeline = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            avatar,
            cfg,
            world: deps.world,
            transport: deps.transport,
            culler: deps.culler,
            prioritizer: deps.prioritizer,
            scans: deps.scans,
            entity_updates: Mutex::new(UpdateQueue::new()),
            avatar_updates: Mutex::new(UpdateQueue::new()),
            animations: Mutex::new(VecDeque::new()),
            properties: Mutex::new(UpdateQueue::new()),
            entities_in_view: Mutex::new(HashSet::new()),
            avatars_in_view: Mutex::new(HashSet::new()),
            camera: Mutex::new(CameraState {
                position,
                velocity: Vec3::ZERO,
                draw_distance,
                last_scan_position: None,
                force_recheck: false,
            }),
            debounce,
            subscription: Mutex::new(None),
            flush_calls: AtomicU32::new(0),
            initial_scan_done: AtomicBool::new(false),
            scan_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let _ = slot.set(Arc::downgrade(&pipeline));
        Ok(pipeline)
    }

    /// Subscribe to world notifications; `close` undoes it.
    pub fn attach(self: &Arc<Self>, bus: &Arc<EventBus>) {
        let id = bus.subscribe(self.clone());
        *self.subscription.lock() = Some((Arc::downgrade(bus), id));
    }

    pub fn avatar(&self) -> AvatarId {
        self.avatar
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn draw_distance(&self) -> f32 {
        self.camera.lock().draw_distance
    }

    pub fn camera(&self) -> CameraState {
        *self.camera.lock()
    }

    pub fn entity_in_view(&self, group: EntityId) -> bool {
        self.entities_in_view.lock().contains(&group)
    }

    pub fn avatar_in_view(&self, avatar: AvatarId) -> bool {
        self.avatars_in_view.lock().contains(&avatar)
    }

    /// Flags pending for `part`, if any.
    pub fn pending_entity_flags(&self, part: EntityId) -> Option<UpdateFlags> {
        self.entity_updates.lock().get(&part).map(|r| r.flags)
    }

    pub fn pending_avatar_flags(&self, avatar: AvatarId) -> Option<UpdateFlags> {
        self.avatar_updates.lock().get(&avatar).copied()
    }

    pub fn pending(&self) -> Pending {
        Pending {
            entities: self.entity_updates.lock().len(),
            avatars: self.avatar_updates.lock().len(),
            animations: self.animations.lock().len(),
            properties: self.properties.lock().len(),
            entities_in_view: self.entities_in_view.lock().len(),
            avatars_in_view: self.avatars_in_view.lock().len(),
        }
    }

    pub fn stats(&self) -> ViewerStats {
        let c = &self.counters;
        ViewerStats {
            scans: c.scans.load(Ordering::Relaxed),
            entities_sent: c.entities_sent.load(Ordering::Relaxed),
            avatars_sent: c.avatars_sent.load(Ordering::Relaxed),
            animations_sent: c.animations_sent.load(Ordering::Relaxed),
            properties_sent: c.properties_sent.load(Ordering::Relaxed),
            batch_failures: c.batch_failures.load(Ordering::Relaxed),
        }
    }

    fn frame(&self) -> ViewerFrame {
        let cam = *self.camera.lock();
        let child = self.world.avatar(self.avatar).is_some_and(|a| a.child);
        ViewerFrame { avatar: self.avatar, camera: cam.position, draw_distance: cam.draw_distance, child }
    }

    // ---- enqueue side -------------------------------------------------

    /// Queue an update for one part. A group the viewer has not seen yet is
    /// upgraded to forced-full updates of every part.
    pub fn queue_entity_update(&self, part: EntityId, flags: UpdateFlags) {
        if self.is_closed() {
            return;
        }
        let Some(group) = self.world.group_of_part(part) else {
            return;
        };
        if group.deleted {
            // the kill message itself travels on a separate path
            self.entities_in_view.lock().remove(&group.id);
            return;
        }
        let visible = self.culler.should_show(&self.frame(), &group, self.world.as_ref(), Instant::now());
        let mut q = self.entity_updates.lock();
        if self.is_closed() {
            return;
        }
        let newly = {
            let mut seen = self.entities_in_view.lock();
            if !visible {
                // out of range: forget it so re-entry starts with a full update again
                if seen.remove(&group.id) {
                    for p in &group.parts {
                        q.remove(&p.id);
                    }
                }
                return;
            }
            seen.insert(group.id)
        };
        if newly {
            for p in &group.parts {
                q.upsert_with(
                    p.id,
                    EntityRecord { group: group.clone(), flags: UpdateFlags::FORCED_FULL },
                    merge_record,
                );
            }
        } else {
            q.upsert_with(part, EntityRecord { group, flags }, merge_record);
        }
    }

    /// Queue an avatar update. Avatars not yet in view are dropped; the next
    /// interest scan picks them up with a full snapshot. An avatar that is no
    /// longer visible leaves the view along with its pending record.
    pub fn queue_avatar_update(&self, avatar: AvatarId, flags: UpdateFlags) {
        if !self.avatars_in_view.lock().contains(&avatar) {
            return;
        }
        let visible =
            self.world.avatar(avatar).is_some_and(|a| self.culler.should_show_avatar(&self.frame(), &a));
        let mut q = self.avatar_updates.lock();
        if self.is_closed() {
            return;
        }
        if !visible {
            self.avatars_in_view.lock().remove(&avatar);
            q.remove(&avatar);
            return;
        }
        q.upsert_with(avatar, flags, merge_flags);
    }

    /// Send a full avatar snapshot now. Unless `forced`, an avatar the culler
    /// rejects is dropped from view instead so a later re-entry is full again.
    pub fn queue_avatar_full_update(&self, avatar: AvatarId, forced: bool) {
        if self.is_closed() {
            return;
        }
        let Some(state) = self.world.avatar(avatar) else {
            self.avatars_in_view.lock().remove(&avatar);
            return;
        };
        if !forced && !self.culler.should_show_avatar(&self.frame(), &state) {
            self.avatars_in_view.lock().remove(&avatar);
            return;
        }
        match self.transport.send_avatar_full(&state) {
            Ok(()) => {
                self.counters.avatars_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.batch_failed("avatar full", &e, 1),
        }
        let mut q = self.avatar_updates.lock();
        if self.is_closed() {
            return;
        }
        self.avatars_in_view.lock().insert(avatar);
        q.upsert_with(avatar, UpdateFlags::FORCED_FULL, merge_flags);
    }

    /// Queue an animation notice, paired with a terse update for the same
    /// avatar when it is in view (own avatar only when not seated).
    pub fn queue_animation(&self, avatar: AvatarId, anims: AnimationSet) {
        {
            let mut q = self.animations.lock();
            if self.is_closed() {
                return;
            }
            q.push_back((avatar, anims));
        }
        if !self.avatars_in_view.lock().contains(&avatar) {
            return;
        }
        let pair_terse = if avatar == self.avatar {
            !self.world.avatar(avatar).is_some_and(|a| a.seated)
        } else {
            true
        };
        if pair_terse {
            self.queue_avatar_update(avatar, UpdateFlags::TERSE);
        }
    }

    /// Queue an object-properties reply for the group owning `part`.
    pub fn queue_object_properties(&self, part: EntityId) {
        let Some(group) = self.world.group_of_part(part) else {
            return;
        };
        let mut q = self.properties.lock();
        if self.is_closed() {
            return;
        }
        q.upsert_with(group.id, (), |_, _| false);
    }

    // ---- drain side ---------------------------------------------------

    /// Drain up to the given budgets. The two budgets are independent.
    pub fn flush(&self, max_entity_updates: usize, max_avatar_updates: usize) -> FlushReport {
        let mut report = FlushReport::default();
        if self.is_closed() {
            return report;
        }
        let calls = self.flush_calls.fetch_add(1, Ordering::AcqRel) + 1;
        if calls <= self.cfg.warmup_flushes {
            report.warming_up = true;
            return report;
        }
        if self.draw_distance() > 0.0 && !self.initial_scan_done.swap(true, Ordering::AcqRel) {
            self.scan_interest();
            report.initial_scan = true;
        }

        let popped_avatars = self.flush_avatars(max_avatar_updates, &mut report);
        self.flush_animations(max_avatar_updates.saturating_sub(popped_avatars), &mut report);
        self.flush_properties(max_entity_updates, &mut report);
        self.flush_entities(max_entity_updates.saturating_sub(report.properties), &mut report);

        metrics::counter!("viewer.flush.entities_total").increment(report.entities as u64);
        metrics::counter!("viewer.flush.avatars_total")
            .increment((report.avatars_full + report.avatars_terse) as u64);
        report
    }

    fn flush_avatars(&self, budget: usize, report: &mut FlushReport) -> usize {
        let batch = self.avatar_updates.lock().pop_batch(budget);
        let popped = batch.len();
        let mut terse = Vec::with_capacity(popped);
        let mut unsent: Vec<(AvatarId, UpdateFlags)> = Vec::new();
        for (i, &(id, flags)) in batch.iter().enumerate() {
            let Some(state) = self.world.avatar(id) else {
                continue;
            };
            if !flags.is_forced() {
                terse.push(AvatarUpdate { avatar: state, flags });
                continue;
            }
            if let Err(e) = self.transport.send_avatar_full(&state) {
                unsent.extend(terse.drain(..).map(|u| (u.avatar.id, u.flags)));
                unsent.extend_from_slice(&batch[i..]);
                self.batch_failed("avatar full", &e, unsent.len());
                report.failures += 1;
                break;
            }
            report.avatars_full += 1;
        }
        if !terse.is_empty() {
            match self.transport.send_avatar_updates(&terse) {
                Ok(()) => report.avatars_terse = terse.len(),
                Err(e) => {
                    unsent.extend(terse.iter().map(|u| (u.avatar.id, u.flags)));
                    self.batch_failed("avatar terse", &e, unsent.len());
                    report.failures += 1;
                }
            }
        }
        if !unsent.is_empty() {
            let mut q = self.avatar_updates.lock();
            if !self.is_closed() {
                for (id, flags) in unsent.into_iter().rev() {
                    q.requeue_front_with(id, flags, merge_flags);
                }
            }
        }
        let sent = (report.avatars_full + report.avatars_terse) as u64;
        self.counters.avatars_sent.fetch_add(sent, Ordering::Relaxed);
        popped
    }

    fn flush_animations(&self, budget: usize, report: &mut FlushReport) {
        let batch: Vec<(AvatarId, AnimationSet)> = {
            let mut q = self.animations.lock();
            let n = budget.min(q.len());
            q.drain(..n).collect()
        };
        // one-shot notices: the rest of a failed batch is dropped, not retried
        let mut sent = 0;
        for (id, anims) in &batch {
            if let Err(e) = self.transport.send_animations(*id, anims) {
                self.batch_failed("animations", &e, 0);
                report.failures += 1;
                break;
            }
            sent += 1;
        }
        report.animations = sent;
        self.counters.animations_sent.fetch_add(sent as u64, Ordering::Relaxed);
    }

    fn flush_properties(&self, budget: usize, report: &mut FlushReport) {
        let batch = self.properties.lock().pop_batch(budget);
        let groups: Vec<Arc<EntityGroup>> =
            batch.iter().filter_map(|&(id, ())| self.world.group(id)).filter(|g| !g.deleted).collect();
        if groups.is_empty() {
            return;
        }
        match self.transport.send_object_properties(&groups) {
            Ok(()) => {
                report.properties = groups.len();
                self.counters.properties_sent.fetch_add(groups.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.batch_failed("object properties", &e, groups.len());
                report.failures += 1;
                let mut q = self.properties.lock();
                if !self.is_closed() {
                    for g in groups.iter().rev() {
                        q.requeue_front_with(g.id, (), |_, _| false);
                    }
                }
            }
        }
    }

    fn flush_entities(&self, budget: usize, report: &mut FlushReport) {
        let batch = self.entity_updates.lock().pop_batch(budget);
        let mut updates = Vec::with_capacity(batch.len());
        for (part_id, rec) in batch {
            // resolve against the live registry; a vanished group is skipped
            let Some(group) = self.world.group(rec.group.id) else {
                continue;
            };
            if group.deleted {
                continue;
            }
            let Some(part) = group.part(part_id).cloned() else {
                continue;
            };
            if !rec.flags.is_flags_only() {
                part.bump_cache_serial();
            }
            updates.push(EntityUpdate { part, group, flags: rec.flags });
        }
        if updates.is_empty() {
            return;
        }
        match self.transport.send_entity_updates(&updates) {
            Ok(()) => {
                report.entities = updates.len();
                self.counters.entities_sent.fetch_add(updates.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.batch_failed("entity updates", &e, updates.len());
                report.failures += 1;
                let mut q = self.entity_updates.lock();
                if !self.is_closed() {
                    for u in updates.into_iter().rev() {
                        let rec = EntityRecord { group: u.group, flags: u.flags };
                        q.requeue_front_with(u.part.id, rec, merge_record);
                    }
                }
            }
        }
    }

    fn batch_failed(&self, what: &str, err: &SendError, requeued: usize) {
        log::warn!(
            "viewer {}: {what} batch failed ({err}); {requeued} record(s) back in queue",
            self.avatar.0
        );
        self.counters.batch_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("viewer.flush.batch_failures_total").increment(1);
    }

    // ---- interest lifecycle -------------------------------------------

    /// Apply a viewer-reported draw distance (clamped) and schedule a
    /// debounced recheck when it changed.
    pub fn set_draw_distance(&self, requested: f32) {
        if self.is_closed() {
            return;
        }
        let max = self.cfg.max_draw_distance.max(self.cfg.min_draw_distance);
        // NaN falls through `max` to the minimum
        let clamped = requested.max(self.cfg.min_draw_distance).min(max);
        {
            let mut cam = self.camera.lock();
            if cam.draw_distance == clamped {
                return;
            }
            cam.draw_distance = clamped;
            cam.force_recheck = true;
        }
        self.debounce.schedule(self.cfg.debounce);
    }

    pub fn on_camera_rotated(&self) {
        if self.is_closed() {
            return;
        }
        self.camera.lock().force_recheck = true;
        self.debounce.schedule(self.cfg.debounce);
    }

    /// Record a camera move; rescan when it is significant.
    pub fn on_camera_moved(&self, position: Vec3, velocity: Vec3) {
        if self.is_closed() {
            return;
        }
        let significant = {
            let mut cam = self.camera.lock();
            cam.position = position;
            cam.velocity = velocity;
            cam.last_scan_position.is_some_and(|last| {
                let ahead = position + velocity * MOVE_LOOKAHEAD_S;
                last.distance_squared(ahead) > self.cfg.move_threshold_sq
            })
        };
        if significant {
            self.request_rescan();
        }
    }

    fn on_debounce_fired(&self) {
        if self.camera.lock().force_recheck {
            self.request_rescan();
        }
    }

    /// Dispatch an interest scan; requests made while one is pending coalesce.
    pub fn request_rescan(&self) {
        if self.is_closed() || self.scan_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scans.dispatch(self.me.clone());
    }

    pub(crate) fn run_pending_scan(&self) {
        self.scan_pending.store(false, Ordering::Release);
        self.scan_interest();
    }

    /// Recompute the interest set from scratch: queue forced-full updates for
    /// newly visible groups (nearest first) and send full snapshots of newly
    /// visible avatars. Nothing is evicted.
    pub fn scan_interest(&self) {
        if self.is_closed() {
            return;
        }
        let t0 = Instant::now();
        let frame = self.frame();
        let world = self.world.as_ref();

        let candidates: Vec<Arc<EntityGroup>> = {
            let groups = world.groups();
            let seen = self.entities_in_view.lock();
            groups.into_iter().filter(|g| !seen.contains(&g.id)).collect()
        };
        let visible: Vec<Arc<EntityGroup>> =
            candidates.into_iter().filter(|g| self.culler.should_show(&frame, g, world, t0)).collect();
        let ordered = order_groups(&frame, self.prioritizer.as_ref(), visible);
        let mut added = 0usize;
        {
            let mut q = self.entity_updates.lock();
            if self.is_closed() {
                return;
            }
            let mut seen = self.entities_in_view.lock();
            for g in &ordered {
                if !seen.insert(g.id) {
                    continue;
                }
                added += 1;
                for p in &g.parts {
                    q.upsert_with(
                        p.id,
                        EntityRecord { group: g.clone(), flags: UpdateFlags::FORCED_FULL },
                        merge_record,
                    );
                }
            }
        }

        let known: HashSet<AvatarId> = self.avatars_in_view.lock().clone();
        for a in world.avatars() {
            if !known.contains(&a.id) && self.culler.should_show_avatar(&frame, &a) {
                self.queue_avatar_full_update(a.id, true);
            }
        }

        {
            let mut cam = self.camera.lock();
            cam.force_recheck = false;
            cam.last_scan_position = Some(frame.camera);
        }
        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("viewer.scan.ms").record(ms);
        log::debug!("viewer {}: interest scan added {added} group(s) in {ms:.2} ms", self.avatar.0);
    }

    // ---- teardown -----------------------------------------------------

    /// Unsubscribe, stop the debounce timer and drop every queued record and
    /// interest entry. Later enqueues are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((bus, id)) = self.subscription.lock().take() {
            if let Some(bus) = bus.upgrade() {
                bus.unsubscribe(id);
            }
        }
        self.debounce.shutdown();
        self.entity_updates.lock().clear();
        self.avatar_updates.lock().clear();
        self.animations.lock().clear();
        self.properties.lock().clear();
        self.entities_in_view.lock().clear();
        self.avatars_in_view.lock().clear();
        log::debug!("viewer {}: pipeline closed", self.avatar.0);
    }
}

impl WorldObserver for ViewerPipeline {
    fn on_event(&self, event: &WorldEvent) {
        match event {
            WorldEvent::EntityChanged { part, flags } => self.queue_entity_update(*part, *flags),
            WorldEvent::AvatarChanged { avatar, flags } => self.queue_avatar_update(*avatar, *flags),
            WorldEvent::AvatarChildState { avatar, child: true } => {
                if *avatar != self.avatar {
                    self.avatars_in_view.lock().remove(avatar);
                }
            }
            WorldEvent::AvatarChildState { avatar, child: false } => {
                self.queue_avatar_full_update(*avatar, false);
            }
            WorldEvent::DrawDistanceChanged { avatar, distance } if *avatar == self.avatar => {
                self.set_draw_distance(*distance);
            }
            WorldEvent::CameraMoved { avatar, position, velocity } if *avatar == self.avatar => {
                self.on_camera_moved(*position, *velocity);
            }
            WorldEvent::CameraRotated { avatar } if *avatar == self.avatar => self.on_camera_rotated(),
            WorldEvent::AnimationsChanged { avatar, anims } => self.queue_animation(*avatar, anims.clone()),
            WorldEvent::ClientClosing { avatar } if *avatar == self.avatar => self.close(),
            _ => {}
        }
    }
}
