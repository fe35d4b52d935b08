//! Session state machine and match-lifetime tasks
//!
//! One [`Session`] models one match attempt from queueing to game over. The
//! session task consumes decoded relay messages, advances the stage machine,
//! and owns every background task of the attempt (asset downloads, the
//! position broadcast loop, the optional hp poll loop). Collaborators talk
//! to a running session through [`SessionHandle`]; all shared state lives in
//! an explicit per-attempt context, reconstructed for every new attempt.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assets::{AssetBarrier, AssetFactory, AssetKey, AssetKind, AssetObject};
use crate::game::{Pose, RemoteEntity, SpawnAssignment, SpawnSlots, TowerState};
use crate::net::protocol::{Build, Message};
use crate::net::{NetError, RelayClient};
use crate::session::{MatchSetup, SessionEvent, SessionStage, TowerSide};
use crate::util::time::{POSITION_BROADCAST_INTERVAL, TOWER_HP_POLL_INTERVAL};

/// Capacity of the session event fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub spawn_slots: SpawnSlots,
    /// Also re-broadcast the opponent-tower health on a fixed interval
    /// (legacy protocol variant). The event-driven broadcast is always on.
    pub tower_hp_poll: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spawn_slots: SpawnSlots::default(),
            tower_hp_poll: false,
        }
    }
}

/// The two towers of a match, seen from the local side.
struct Towers {
    /// Defended by this client; health is overwritten by peer broadcasts.
    own: TowerState,
    /// Hit by local shots; this client computes its damage.
    opponent: TowerState,
}

/// Per-attempt context shared between the session task and its handle
struct Shared {
    session_id: Uuid,
    client: RelayClient,
    stage_tx: watch::Sender<SessionStage>,
    events_tx: broadcast::Sender<SessionEvent>,
    /// Latest local pose, written by the movement collaborator and read by
    /// the position broadcast loop.
    local_pose: Mutex<Pose>,
    opponent: Mutex<Option<RemoteEntity>>,
    towers: Mutex<Option<Towers>>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; the UI may not be listening yet.
        let _ = self.events_tx.send(event);
    }
}

/// Wake-up sources of the session task
enum Wake {
    Shutdown,
    Disconnected,
    Inbound(Result<Message, broadcast::error::RecvError>),
    Internal(Internal),
}

/// Events produced by the session's own background tasks
enum Internal {
    AssetsComplete(HashMap<AssetKey, AssetObject>),
    AssetProgress(usize),
}

/// Handle to a running match session.
///
/// Cheap to clone. Inputs from the movement, shooting and collision
/// collaborators come in through here; stage changes and discrete events go
/// out through [`SessionHandle::stage`] and [`SessionHandle::events`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    /// Watch the session stage.
    pub fn stage(&self) -> watch::Receiver<SessionStage> {
        self.shared.stage_tx.subscribe()
    }

    pub fn current_stage(&self) -> SessionStage {
        *self.shared.stage_tx.borrow()
    }

    /// Subscribe to discrete session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.client.is_connected()
    }

    /// Submit the build prompt. Only meaningful once matched; outside that
    /// stage the call is silently ignored.
    pub fn submit_prompt(&self, prompt: &str) -> Result<(), NetError> {
        if self.current_stage() != SessionStage::Matched {
            debug!("prompt submitted outside the matched stage, ignoring");
            return Ok(());
        }
        self.shared.client.send(Message::SubmitPrompt {
            prompt: prompt.to_string(),
        })
    }

    /// Record the latest local pose for the position broadcast loop.
    pub fn update_local_pose(&self, pose: Pose) {
        *self.shared.local_pose.lock() = pose;
    }

    /// Broadcast a local shot. The shot's visuals are the shooting
    /// collaborator's job; this only tells the peer.
    pub fn report_local_shot(&self, power: f32) -> Result<(), NetError> {
        if self.current_stage() != SessionStage::Playing {
            return Ok(());
        }
        self.shared.client.send(Message::Shoot {
            power,
            player_number: None,
        })
    }

    /// Apply locally-detected shot damage to the opponent's tower.
    ///
    /// Accepted applications (outside the cooldown, tower still standing)
    /// broadcast the resulting absolute health to the peer immediately.
    pub fn report_tower_hit(&self, amount: f32) -> Result<(), NetError> {
        if self.current_stage() != SessionStage::Playing {
            return Ok(());
        }

        let accepted = {
            let mut towers = self.shared.towers.lock();
            towers
                .as_mut()
                .and_then(|t| t.opponent.apply_local_damage(amount))
        };

        if let Some(hp) = accepted {
            info!(hp, "local hit accepted, broadcasting tower health");
            self.shared.emit(SessionEvent::TowerHpChanged {
                side: TowerSide::Opponent,
                hp,
            });
            self.shared.client.send(Message::TowerHp {
                hp,
                player_number: None,
            })?;
        }
        Ok(())
    }

    /// Advance the opponent's rendered pose. Driven by the render loop.
    pub fn tick_opponent(&self, dt: f32) -> Option<Pose> {
        self.shared.opponent.lock().as_mut().map(|o| o.tick(dt))
    }

    /// Current health of one tower, once builds are in.
    pub fn tower_hp(&self, side: TowerSide) -> Option<f32> {
        let towers = self.shared.towers.lock();
        towers.as_ref().map(|t| match side {
            TowerSide::Local => t.own.hp(),
            TowerSide::Opponent => t.opponent.hp(),
        })
    }

    /// Tear the session down: cancels the periodic loops and in-flight
    /// downloads and closes the transport. Idempotent, never fails.
    pub fn shutdown(&self) {
        self.shared.client.close();
        self.shutdown.notify_one();
    }
}

/// One match attempt
pub struct Session {
    shared: Arc<Shared>,
    config: SessionConfig,
    factory: Arc<dyn AssetFactory>,
    inbound: broadcast::Receiver<Message>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    shutdown: Arc<Notify>,

    stage: SessionStage,
    player_number: Option<u8>,
    local_build: Option<Build>,
    opponent_build: Option<Build>,
    spawns: Option<SpawnAssignment>,
    barrier: Option<Arc<AssetBarrier>>,
    assets: Option<HashMap<AssetKey, AssetObject>>,
    play_signaled: bool,

    /// Tasks owned by this attempt; aborted together at teardown.
    background: Vec<JoinHandle<()>>,
}

impl Session {
    /// Connect to the relay and start a session over the new connection.
    pub async fn connect(
        config: SessionConfig,
        relay_url: &str,
        factory: Arc<dyn AssetFactory>,
    ) -> Result<SessionHandle, NetError> {
        let client = RelayClient::connect(relay_url).await?;
        Ok(Self::begin(config, client, factory))
    }

    /// Start a session over an already-connected client.
    ///
    /// The session immediately requests matchmaking (`join_queue`) and moves
    /// to [`SessionStage::Queued`].
    pub fn begin(
        config: SessionConfig,
        client: RelayClient,
        factory: Arc<dyn AssetFactory>,
    ) -> SessionHandle {
        let (stage_tx, _) = watch::channel(SessionStage::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        // Subscribe before join_queue goes out so no reply can be missed.
        let inbound = client.subscribe();

        let shared = Arc::new(Shared {
            session_id: Uuid::new_v4(),
            client,
            stage_tx,
            events_tx,
            local_pose: Mutex::new(Pose::default()),
            opponent: Mutex::new(None),
            towers: Mutex::new(None),
        });
        let shutdown = Arc::new(Notify::new());

        shared.stage_tx.send_replace(SessionStage::Connecting);

        let session = Session {
            shared: shared.clone(),
            config,
            factory,
            inbound,
            internal_tx,
            internal_rx,
            shutdown: shutdown.clone(),
            stage: SessionStage::Connecting,
            player_number: None,
            local_build: None,
            opponent_build: None,
            spawns: None,
            barrier: None,
            assets: None,
            play_signaled: false,
            background: Vec::new(),
        };
        tokio::spawn(session.run());

        SessionHandle { shared, shutdown }
    }

    async fn run(mut self) {
        info!(session = %self.shared.session_id, "session started");

        if self.shared.client.send(Message::JoinQueue).is_err() {
            warn!("transport closed before the queue request could be sent");
            self.shared.emit(SessionEvent::Disconnected);
            self.teardown();
            return;
        }
        self.set_stage(SessionStage::Queued);

        let shutdown = self.shutdown.clone();
        let client = self.shared.client.clone();

        loop {
            let wake = tokio::select! {
                _ = shutdown.notified() => Wake::Shutdown,
                _ = client.wait_disconnected() => Wake::Disconnected,
                msg = self.inbound.recv() => Wake::Inbound(msg),
                Some(internal) = self.internal_rx.recv() => Wake::Internal(internal),
            };

            match wake {
                Wake::Shutdown => {
                    info!(session = %self.shared.session_id, "shutdown requested");
                    break;
                }
                Wake::Disconnected => {
                    if self.stage != SessionStage::Ended {
                        warn!(session = %self.shared.session_id, "relay connection lost");
                        self.shared.emit(SessionEvent::Disconnected);
                    }
                    break;
                }
                Wake::Inbound(Ok(msg)) => self.handle_message(msg),
                Wake::Inbound(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!(missed, "session lagged behind inbound messages");
                }
                Wake::Inbound(Err(broadcast::error::RecvError::Closed)) => break,
                Wake::Internal(internal) => self.handle_internal(internal),
            }
        }

        self.teardown();
        info!(session = %self.shared.session_id, stage = ?self.stage, "session ended");
    }

    /// Dispatch one inbound message against the current stage. Tags that
    /// are not meaningful in the current stage are dropped silently.
    fn handle_message(&mut self, msg: Message) {
        // Terminal: nothing mutates a finished session.
        if self.stage == SessionStage::Ended {
            return;
        }

        match msg {
            Message::Queued => {
                if self.stage == SessionStage::Queued {
                    self.shared.emit(SessionEvent::Queued);
                }
            }

            Message::Matched { player_number } => {
                if self.stage == SessionStage::Queued {
                    info!(player_number, "opponent found");
                    self.player_number = Some(player_number);
                    self.set_stage(SessionStage::Matched);
                    self.shared
                        .emit(SessionEvent::OpponentFound { player_number });
                }
            }

            Message::BothPromptsIn => {
                if self.stage == SessionStage::Matched {
                    self.shared.emit(SessionEvent::Analyzing);
                }
            }

            Message::BuildsReady {
                your_build,
                opponent_build,
            } => {
                if self.stage == SessionStage::Matched {
                    self.on_builds_ready(your_build, opponent_build);
                }
            }

            Message::AssetReady {
                name,
                player_number,
                url,
            } => {
                if self.stage != SessionStage::NegotiatingAssets {
                    return;
                }
                match AssetKind::parse(&name) {
                    Some(kind) => {
                        if let Some(barrier) = &self.barrier {
                            barrier.announce(AssetKey::new(kind, player_number), url);
                        }
                    }
                    None => warn!(name = %name, "asset announcement with unknown kind"),
                }
            }

            Message::Playing => {
                if self.stage == SessionStage::NegotiatingAssets {
                    self.play_signaled = true;
                    self.maybe_start_play();
                }
            }

            Message::PlayerUpdate {
                position,
                rotation1,
                rotation2,
                player_number,
            } => {
                if self.stage == SessionStage::Playing && !self.is_echo(player_number) {
                    if let Some(opponent) = self.shared.opponent.lock().as_mut() {
                        opponent.set_target(position, rotation1, rotation2);
                    }
                }
            }

            Message::Shoot {
                power,
                player_number,
            } => {
                if self.stage == SessionStage::Playing && !self.is_echo(player_number) {
                    self.shared.emit(SessionEvent::OpponentShot { power });
                }
            }

            Message::TowerHp { hp, player_number } => {
                if self.stage == SessionStage::Playing && !self.is_echo(player_number) {
                    let applied = {
                        let mut towers = self.shared.towers.lock();
                        towers.as_mut().map(|t| t.own.apply_remote_health(hp))
                    };
                    if let Some(hp) = applied {
                        self.shared.emit(SessionEvent::TowerHpChanged {
                            side: TowerSide::Local,
                            hp,
                        });
                    }
                }
            }

            Message::GameOver { winner } => {
                let victory = self.player_number == Some(winner);
                info!(winner, victory, "game over");
                self.set_stage(SessionStage::Ended);
                self.shared.emit(SessionEvent::GameOver { victory });
            }

            // Client-originated tags arriving inbound are relay noise.
            Message::JoinQueue | Message::SubmitPrompt { .. } => {}
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        if self.stage != SessionStage::NegotiatingAssets {
            return;
        }
        match internal {
            Internal::AssetsComplete(assets) => {
                info!(count = assets.len(), "all match assets materialized");
                self.assets = Some(assets);
                self.maybe_start_play();
            }
            Internal::AssetProgress(ready) => {
                let total = self
                    .barrier
                    .as_ref()
                    .map(|b| b.expected_count())
                    .unwrap_or(0);
                self.shared
                    .emit(SessionEvent::AssetProgress { ready, total });
            }
        }
    }

    /// Relay-stamped frames carrying our own player number are echoes.
    fn is_echo(&self, player_number: Option<u8>) -> bool {
        player_number.is_some() && player_number == self.player_number
    }

    fn on_builds_ready(&mut self, your_build: Build, opponent_build: Build) {
        let Some(player_number) = self.player_number else {
            warn!("builds received before the player number was assigned");
            return;
        };

        let spawns = self.config.spawn_slots.assign(player_number);
        *self.shared.local_pose.lock() = Pose::at_spawn(spawns.local);
        *self.shared.opponent.lock() = Some(RemoteEntity::new(Pose::at_spawn(spawns.opponent)));
        *self.shared.towers.lock() = Some(Towers {
            own: TowerState::new(your_build.tower_hp),
            opponent: TowerState::new(opponent_build.tower_hp),
        });

        info!(
            own_tower_hp = your_build.tower_hp,
            opponent_tower_hp = opponent_build.tower_hp,
            "builds received, negotiating assets"
        );

        self.spawns = Some(spawns);
        self.local_build = Some(your_build);
        self.opponent_build = Some(opponent_build);

        let barrier = Arc::new(AssetBarrier::new(self.factory.clone()));

        // Completion waiter: turns the barrier resolving into a session wake.
        let internal_tx = self.internal_tx.clone();
        let waiter = barrier.clone();
        self.background.push(tokio::spawn(async move {
            let assets = waiter.wait_complete().await;
            let _ = internal_tx.send(Internal::AssetsComplete(assets));
        }));

        // Progress forwarder for the loading UI.
        let internal_tx = self.internal_tx.clone();
        let mut progress = barrier.progress();
        let total = barrier.expected_count();
        self.background.push(tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let ready = *progress.borrow();
                if internal_tx.send(Internal::AssetProgress(ready)).is_err() || ready >= total {
                    break;
                }
            }
        }));

        self.barrier = Some(barrier);
        self.set_stage(SessionStage::NegotiatingAssets);
        self.shared.emit(SessionEvent::Preparing);
    }

    /// Play starts on whichever of the two gates completes second: the asset
    /// barrier and the relay's `playing` signal.
    fn maybe_start_play(&mut self) {
        if self.stage != SessionStage::NegotiatingAssets || !self.play_signaled {
            return;
        }
        let Some(assets) = self.assets.take() else {
            return;
        };
        let (Some(player_number), Some(spawns), Some(local_build), Some(opponent_build)) = (
            self.player_number,
            self.spawns,
            self.local_build.clone(),
            self.opponent_build.clone(),
        ) else {
            warn!("play gates passed without match context");
            return;
        };

        self.set_stage(SessionStage::Playing);
        info!(session = %self.shared.session_id, player_number, "match started");

        self.shared
            .emit(SessionEvent::MatchStarted(Box::new(MatchSetup {
                player_number,
                local_build,
                opponent_build,
                spawns,
                assets,
                local_shooting_enabled: true,
                opponent_shooting_enabled: false,
            })));

        // Match-lifetime loops. Deliberately not stopped at game over; they
        // run until the session itself is torn down.
        self.background
            .push(tokio::spawn(position_broadcast_loop(self.shared.clone())));
        if self.config.tower_hp_poll {
            self.background
                .push(tokio::spawn(tower_hp_poll_loop(self.shared.clone())));
        }
    }

    fn set_stage(&mut self, stage: SessionStage) {
        self.stage = stage;
        self.shared.stage_tx.send_replace(stage);
        debug!(stage = ?stage, "session stage changed");
    }

    fn teardown(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        if let Some(barrier) = &self.barrier {
            barrier.cancel();
        }
        self.shared.client.close();
    }
}

/// Broadcast the local pose on a fixed interval for the match's lifetime.
async fn position_broadcast_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(POSITION_BROADCAST_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let pose = *shared.local_pose.lock();
        let msg = Message::PlayerUpdate {
            position: pose.position,
            rotation1: pose.body_rotation,
            rotation2: pose.aim_rotation,
            player_number: None,
        };
        if shared.client.send(msg).is_err() {
            debug!("position broadcast loop stopping, transport closed");
            break;
        }
    }
}

/// Legacy protocol variant: re-broadcast the opponent-tower health on a
/// fixed interval regardless of changes.
async fn tower_hp_poll_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(TOWER_HP_POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let hp = {
            let towers = shared.towers.lock();
            towers.as_ref().map(|t| t.opponent.hp())
        };
        let Some(hp) = hp else { continue };

        if shared
            .client
            .send(Message::TowerHp {
                hp,
                player_number: None,
            })
            .is_err()
        {
            debug!("tower hp poll loop stopping, transport closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MaterializeError;
    use crate::net::client::tests::MockTransport;
    use crate::net::protocol::{Quat, Vec3};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Factory that materializes every asset instantly.
    struct InstantFactory;

    #[async_trait]
    impl AssetFactory for InstantFactory {
        async fn materialize(
            &self,
            key: AssetKey,
            url: &str,
        ) -> Result<AssetObject, MaterializeError> {
            Ok(AssetObject {
                key,
                url: url.to_string(),
                data: Bytes::from_static(b"glb"),
                fetched_at_ms: 0,
            })
        }
    }

    fn build(tower_hp: f32) -> Build {
        Build {
            tower_hp,
            tower_description: "granite keep".into(),
            tower_model_url: "https://cdn.example/tower.glb".into(),
            bomb_damage: 25.0,
            bomb_description: "iron shell".into(),
            bomb_model_url: "https://cdn.example/bomb.glb".into(),
            shield_hp: 50.0,
            shield_description: "oak pavise".into(),
            shield_model_url: "https://cdn.example/shield.glb".into(),
            tone: "medieval".into(),
        }
    }

    /// Frames a relay sends for a full pre-match flow.
    fn match_flow(player_number: u8) -> Vec<Message> {
        let mut frames = vec![
            Message::Queued,
            Message::Matched { player_number },
            Message::BothPromptsIn,
            Message::BuildsReady {
                your_build: build(100.0),
                opponent_build: build(120.0),
            },
        ];
        for kind in ["tower", "bomb", "shield"] {
            for player in [1u8, 2] {
                frames.push(Message::AssetReady {
                    name: kind.into(),
                    player_number: player,
                    url: format!("https://cdn.example/{kind}{player}.glb"),
                });
            }
        }
        frames.push(Message::Playing);
        frames
    }

    fn start(frames: Vec<Message>) -> (SessionHandle, Arc<StdMutex<Vec<String>>>) {
        let (transport, sent) = MockTransport::scripted(&frames);
        let client = RelayClient::start(transport);
        let handle = Session::begin(SessionConfig::default(), client, Arc::new(InstantFactory));
        (handle, sent)
    }

    async fn wait_stage(handle: &SessionHandle, stage: SessionStage) {
        let mut rx = handle.stage();
        timeout(Duration::from_secs(1), rx.wait_for(|s| *s == stage))
            .await
            .expect("stage not reached in time")
            .unwrap();
    }

    fn sent_frames_with_tag(sent: &Arc<StdMutex<Vec<String>>>, tag: &str) -> Vec<String> {
        let needle = format!("\"type\":\"{tag}\"");
        sent.lock()
            .unwrap()
            .iter()
            .filter(|f| f.contains(&needle))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn full_match_flow_reaches_playing_and_broadcasts_damage() {
        let (handle, sent) = start(match_flow(1));
        let mut events = handle.events();

        wait_stage(&handle, SessionStage::Playing).await;

        // The very first outbound frame is the queue request.
        assert_eq!(
            sent.lock().unwrap().first().map(String::as_str),
            Some(r#"{"type":"join_queue"}"#)
        );

        // MatchStarted carries all six assets and the parity spawns.
        let setup = loop {
            match timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("no MatchStarted event")
                .unwrap()
            {
                SessionEvent::MatchStarted(setup) => break setup,
                _ => continue,
            }
        };
        assert_eq!(setup.player_number, 1);
        assert_eq!(setup.assets.len(), 6);
        assert_eq!(setup.spawns.local, SpawnSlots::default().a1);
        assert_eq!(setup.spawns.opponent, SpawnSlots::default().a2);
        assert!(setup.local_shooting_enabled);
        assert!(!setup.opponent_shooting_enabled);

        // Parity resolves which generated model belongs to which side.
        let local_tower = setup.asset_for(AssetKind::Tower, TowerSide::Local).unwrap();
        assert_eq!(local_tower.key, AssetKey::new(AssetKind::Tower, 1));
        let opponent_bomb = setup.asset_for(AssetKind::Bomb, TowerSide::Opponent).unwrap();
        assert_eq!(opponent_bomb.key, AssetKey::new(AssetKind::Bomb, 2));

        // A 25-damage hit on the 120-hp opponent tower broadcasts hp 95.
        handle.report_tower_hit(25.0).unwrap();
        assert_eq!(handle.tower_hp(TowerSide::Opponent), Some(95.0));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let hp_frames = sent_frames_with_tag(&sent, "tower_hp");
        assert_eq!(hp_frames.len(), 1);
        assert!(hp_frames[0].contains("\"hp\":95.0"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn play_signal_before_assets_still_starts_the_match() {
        // Reorder: playing arrives before any asset announcement.
        let mut frames = match_flow(1);
        let playing = frames.pop().unwrap();
        frames.insert(4, playing);

        let (handle, _sent) = start(frames);
        wait_stage(&handle, SessionStage::Playing).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn player_two_gets_the_inverse_spawn_assignment() {
        let (handle, _sent) = start(match_flow(2));
        let mut events = handle.events();

        wait_stage(&handle, SessionStage::Playing).await;

        let setup = loop {
            match events.recv().await.unwrap() {
                SessionEvent::MatchStarted(setup) => break setup,
                _ => continue,
            }
        };
        assert_eq!(setup.spawns.local, SpawnSlots::default().a2);
        assert_eq!(setup.spawns.opponent, SpawnSlots::default().a1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn inbound_pose_reports_move_the_opponent() {
        let mut frames = match_flow(1);
        frames.push(Message::PlayerUpdate {
            position: Vec3::new(5.0, 0.0, 0.0),
            rotation1: Quat::IDENTITY,
            rotation2: Quat::IDENTITY,
            player_number: Some(2),
        });

        let (handle, _sent) = start(frames);
        wait_stage(&handle, SessionStage::Playing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut pose = Pose::default();
        for _ in 0..200 {
            pose = handle.tick_opponent(0.05).expect("opponent not spawned");
        }
        assert!((pose.position.x - 5.0).abs() < 1e-2);

        handle.shutdown();
    }

    #[tokio::test]
    async fn echoed_frames_from_the_local_player_are_ignored() {
        let mut frames = match_flow(1);
        frames.push(Message::Shoot {
            power: 10.0,
            player_number: Some(1),
        });
        frames.push(Message::PlayerUpdate {
            position: Vec3::new(99.0, 0.0, 0.0),
            rotation1: Quat::IDENTITY,
            rotation2: Quat::IDENTITY,
            player_number: Some(1),
        });

        let (handle, _sent) = start(frames);
        let mut events = handle.events();
        wait_stage(&handle, SessionStage::Playing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // No OpponentShot was emitted for our own echoed shot.
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, SessionEvent::OpponentShot { .. }));
        }

        // The echoed pose did not become the opponent's target.
        let pose = handle.tick_opponent(10.0).unwrap();
        assert!((pose.position.x - SpawnSlots::default().a2.position.x).abs() < 1e-3);

        handle.shutdown();
    }

    #[tokio::test]
    async fn remote_tower_hp_overwrites_the_defended_tower() {
        let mut frames = match_flow(1);
        frames.push(Message::TowerHp {
            hp: 40.0,
            player_number: Some(2),
        });

        let (handle, _sent) = start(frames);
        wait_stage(&handle, SessionStage::Playing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(handle.tower_hp(TowerSide::Local), Some(40.0));
        // The authoritative opponent tower is untouched.
        assert_eq!(handle.tower_hp(TowerSide::Opponent), Some(120.0));

        handle.shutdown();
    }

    #[tokio::test]
    async fn game_over_is_terminal_in_any_stage() {
        let mut frames = match_flow(1);
        frames.push(Message::GameOver { winner: 2 });
        // Frames after game over must not mutate anything.
        frames.push(Message::TowerHp {
            hp: 1.0,
            player_number: Some(2),
        });

        let (handle, _sent) = start(frames);
        let mut events = handle.events();
        wait_stage(&handle, SessionStage::Ended).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut saw_defeat = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::GameOver { victory } = event {
                assert!(!victory);
                saw_defeat = true;
            }
        }
        assert!(saw_defeat);

        // The post-game tower_hp frame was ignored.
        assert_eq!(handle.tower_hp(TowerSide::Local), Some(100.0));
        assert_eq!(handle.current_stage(), SessionStage::Ended);

        handle.shutdown();
    }

    #[tokio::test]
    async fn game_over_before_builds_ends_the_session() {
        let frames = vec![
            Message::Queued,
            Message::Matched { player_number: 1 },
            Message::GameOver { winner: 1 },
        ];
        let (handle, _sent) = start(frames);
        wait_stage(&handle, SessionStage::Ended).await;
        handle.shutdown();
    }

    #[tokio::test]
    async fn prompts_outside_the_matched_stage_are_not_sent() {
        let (handle, sent) = start(vec![]);
        wait_stage(&handle, SessionStage::Queued).await;

        handle.submit_prompt("a fortress of obsidian").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(sent_frames_with_tag(&sent, "submit_prompt").is_empty());
        handle.shutdown();
    }

    #[tokio::test]
    async fn prompt_is_sent_once_matched() {
        let frames = vec![Message::Queued, Message::Matched { player_number: 1 }];
        let (handle, sent) = start(frames);
        wait_stage(&handle, SessionStage::Matched).await;

        handle.submit_prompt("a fortress of obsidian").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let prompts = sent_frames_with_tag(&sent, "submit_prompt");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("a fortress of obsidian"));
        handle.shutdown();
    }

    #[tokio::test]
    async fn position_loop_broadcasts_the_local_pose() {
        let (handle, sent) = start(match_flow(1));
        wait_stage(&handle, SessionStage::Playing).await;

        handle.update_local_pose(Pose {
            position: Vec3::new(1.0, 2.0, 3.0),
            body_rotation: Quat::IDENTITY,
            aim_rotation: Quat::IDENTITY,
        });

        tokio::time::sleep(Duration::from_millis(450)).await;

        let updates = sent_frames_with_tag(&sent, "player_update");
        assert!(!updates.is_empty(), "no position broadcast went out");
        assert!(updates.last().unwrap().contains("\"x\":1.0"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn damage_during_cooldown_is_not_rebroadcast() {
        let (handle, sent) = start(match_flow(1));
        wait_stage(&handle, SessionStage::Playing).await;

        handle.report_tower_hit(25.0).unwrap();
        handle.report_tower_hit(25.0).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent_frames_with_tag(&sent, "tower_hp").len(), 1);
        assert_eq!(handle.tower_hp(TowerSide::Opponent), Some(95.0));

        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn hp_poll_variant_rebroadcasts_on_a_fixed_interval() {
        let (transport, sent) = MockTransport::scripted(&match_flow(1));
        let client = RelayClient::start(transport);
        let config = SessionConfig {
            tower_hp_poll: true,
            ..Default::default()
        };
        let handle = Session::begin(config, client, Arc::new(InstantFactory));

        wait_stage(&handle, SessionStage::Playing).await;
        tokio::time::sleep(Duration::from_millis(2100)).await;

        // Re-broadcasts the (untouched) opponent tower health every second.
        let hp_frames = sent_frames_with_tag(&sent, "tower_hp");
        assert!(hp_frames.len() >= 2, "poll loop sent {}", hp_frames.len());
        assert!(hp_frames[0].contains("\"hp\":120.0"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn shots_are_broadcast_only_while_playing() {
        let (handle, sent) = start(vec![]);
        wait_stage(&handle, SessionStage::Queued).await;

        handle.report_local_shot(25.0).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent_frames_with_tag(&sent, "shoot").is_empty());

        handle.shutdown();
    }
}
