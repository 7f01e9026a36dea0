//! The conversation controller: owns the visible chat, the compacted router
//! log and the landing/chat phase, and turns user input and player events
//! into router turns.
//!
//! State sits behind one `tokio::sync::Mutex`. Every entry point validates and
//! mutates under the lock, releases it for the network call, then re-locks to
//! apply the result. A turn carries the session generation it started in; if
//! `reset_session` ran meanwhile the result is dropped.

pub mod budget;
pub mod messages;
pub mod script;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use self::budget::{ActionBudget, BudgetCheck};
use self::messages::{ControllerEvent, ControllerSnapshot, Message, MessageBody, Phase, Widget};
use self::script::*;
use crate::catalog::VideoCatalog;
use crate::nudge::video::{VideoEvent, VideoNudges};
use crate::nudge::{ActionKind, NudgePolicy};
use crate::pacing::Pacer;
use crate::progress::{Act, SessionProgress};
use crate::router::log::{compact, LogEntry, LOG_WINDOW};
use crate::router::tools::DisplayKind;
use crate::router::transport::RouterTransport;
use crate::router::{RouterClient, TurnReply};
use crate::storage::SessionStore;
use crate::watchdog::IdleHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRejection {
    WrongPhase,
    Busy,
    EmptyInput,
    BudgetExhausted,
    NotEligible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The turn ran but fell back to a fixed line.
    Degraded,
    Rejected(TurnRejection),
    /// A session reset happened while the turn was in flight.
    Discarded,
}

pub struct ControllerDeps {
    pub transport: Arc<dyn RouterTransport>,
    pub catalog: Arc<dyn VideoCatalog>,
    pub durable_store: Arc<dyn SessionStore>,
    pub tab_store: Arc<dyn SessionStore>,
    pub pacer: Arc<dyn Pacer>,
    pub events: flume::Sender<ControllerEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub skip_landing: bool,
}

struct ControllerState {
    phase: Phase,
    messages: Vec<Message>,
    log: Vec<LogEntry>,
    chips: Vec<String>,
    typing: bool,
    running_act1: bool,
    video_playing: bool,
    dark_mode: bool,
    budget: ActionBudget,
    video_nudges: VideoNudges,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TurnKind {
    Chat,
    OpenVideo { video_id: String },
    Idle,
    Engagement,
}

impl TurnKind {
    /// Line shown when the round trip fails; background turns fail silently.
    fn failure_text(&self) -> Option<&'static str> {
        match self {
            TurnKind::Chat => Some(APOLOGY),
            TurnKind::OpenVideo { .. } => Some(VIDEO_RETRY),
            TurnKind::Idle | TurnKind::Engagement => None,
        }
    }
}

struct PendingTurn {
    kind: TurnKind,
    generation: u64,
    log: Vec<LogEntry>,
    user_text: String,
    synthetic: Option<String>,
}

pub struct ConversationController {
    router: RouterClient,
    catalog: Arc<dyn VideoCatalog>,
    progress: SessionProgress,
    nudges: NudgePolicy,
    pacer: Arc<dyn Pacer>,
    events: flume::Sender<ControllerEvent>,
    state: Mutex<ControllerState>,
}

impl ConversationController {
    pub fn new(deps: ControllerDeps, options: ControllerOptions) -> Self {
        let progress = SessionProgress::new(deps.durable_store.clone(), deps.tab_store.clone());
        let mut controller = Self {
            router: RouterClient::new(deps.transport, deps.catalog.clone()),
            catalog: deps.catalog,
            nudges: NudgePolicy::new(deps.tab_store),
            progress,
            pacer: deps.pacer,
            events: deps.events,
            state: Mutex::new(ControllerState {
                phase: Phase::Landing,
                messages: Vec::new(),
                log: Vec::new(),
                chips: Vec::new(),
                typing: false,
                running_act1: false,
                video_playing: false,
                dark_mode: false,
                budget: ActionBudget::new(),
                video_nudges: VideoNudges::new(),
                generation: 0,
            }),
        };

        if options.skip_landing || controller.progress.landing_complete() {
            controller.enter_returning_visitor();
        }
        controller
    }

    /// Starts directly in chat with the welcome-back line.
    fn enter_returning_visitor(&mut self) {
        tracing::info!("Skipping landing for returning visitor");
        self.advance_act(Act::One);

        let chips = act1_chips();
        let welcome = Message::assistant(WELCOME_BACK, chips.clone());
        let state = self.state.get_mut();
        state.phase = Phase::Chat;
        state.messages.push(welcome.clone());
        state.chips = chips.clone();

        self.emit(ControllerEvent::PhaseChanged(Phase::Chat));
        self.emit(ControllerEvent::MessageAdded(welcome));
        self.emit(ControllerEvent::ChipsChanged(chips));
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No listener for controller events");
        }
    }

    fn push(&self, state: &mut ControllerState, message: Message) {
        state.messages.push(message.clone());
        self.emit(ControllerEvent::MessageAdded(message));
    }

    fn set_chips(&self, state: &mut ControllerState, chips: Vec<String>) {
        state.chips = chips.clone();
        self.emit(ControllerEvent::ChipsChanged(chips));
    }

    fn set_typing(&self, state: &mut ControllerState, typing: bool) {
        if state.typing != typing {
            state.typing = typing;
            self.emit(ControllerEvent::TypingChanged(typing));
        }
    }

    fn advance_act(&self, target: Act) {
        let before = self.progress.get();
        let after = self.progress.advance(target);
        if after != before {
            self.emit(ControllerEvent::ActChanged(after));
        }
    }

    fn is_busy(state: &ControllerState) -> bool {
        state.typing || state.running_act1
    }

    fn check_budget(&self, state: &mut ControllerState) -> Result<(), TurnRejection> {
        match state.budget.try_consume() {
            BudgetCheck::Granted => Ok(()),
            BudgetCheck::JustExhausted => {
                tracing::info!("Action budget exhausted");
                self.push(state, Message::assistant(LIMIT_REACHED, Vec::new()));
                Err(TurnRejection::BudgetExhausted)
            }
            BudgetCheck::Exhausted => Err(TurnRejection::BudgetExhausted),
        }
    }

    fn idle_eligible(state: &ControllerState) -> bool {
        state.phase == Phase::Chat
            && !Self::is_busy(state)
            && !state.video_playing
            && !state.budget.is_exhausted()
    }

    fn engagement_eligible(state: &ControllerState) -> bool {
        state.phase == Phase::Chat && !Self::is_busy(state) && !state.budget.is_exhausted()
    }

    fn begin_turn(
        &self,
        state: &mut ControllerState,
        kind: TurnKind,
        user_text: String,
        synthetic: Option<String>,
    ) -> PendingTurn {
        self.set_typing(state, true);
        PendingTurn {
            kind,
            generation: state.generation,
            log: state.log.clone(),
            user_text,
            synthetic,
        }
    }

    async fn dispatch(&self, turn: PendingTurn) -> TurnOutcome {
        let result = self
            .router
            .send_turn(&turn.log, &turn.user_text, turn.synthetic.as_deref())
            .await;

        let mut state = self.state.lock().await;
        if state.generation != turn.generation {
            tracing::debug!("Discarding {:?} turn from a previous session", turn.kind);
            return TurnOutcome::Discarded;
        }

        let outcome = match result {
            Ok(reply) => {
                self.apply_reply(&mut state, reply);
                TurnOutcome::Completed
            }
            Err(e) => {
                tracing::warn!("{:?} turn failed: {:#}", turn.kind, e);
                if let Some(text) = turn.kind.failure_text() {
                    self.push(&mut state, Message::assistant(text, Vec::new()));
                }
                TurnOutcome::Degraded
            }
        };

        if let TurnKind::OpenVideo { video_id } = &turn.kind {
            self.push(
                &mut state,
                Message::widget(Widget::HeroPlayer {
                    video_id: video_id.clone(),
                }),
            );
            self.emit(ControllerEvent::VideoOpened {
                video_id: video_id.clone(),
            });
        }

        self.set_typing(&mut state, false);
        outcome
    }

    fn apply_reply(&self, state: &mut ControllerState, reply: TurnReply) {
        state.log = compact(&reply.next_log, LOG_WINDOW);

        let chips = reply.chips.unwrap_or_default();
        self.push(state, Message::assistant(reply.text, chips.clone()));
        self.set_chips(state, chips);

        if reply.show_all_videos == Some(true) {
            let video_ids = self
                .catalog
                .all_videos()
                .into_iter()
                .map(|video| video.id)
                .collect();
            self.push(state, Message::widget(Widget::MegaCard { video_ids }));
        }

        if let Some(dark) = reply.dark_mode_enabled {
            if dark != state.dark_mode {
                state.dark_mode = dark;
                self.emit(ControllerEvent::DarkModeChanged(dark));
                let line = if dark { DARK_MODE_ON } else { DARK_MODE_OFF };
                self.push(state, Message::system_log(line));
            }
        }

        if reply.show_profile_card == Some(true) {
            self.push(state, Message::widget(Widget::ProfileCard));
            self.advance_act(Act::Two);
        }

        if reply.show_contact_card == Some(true) {
            self.push(state, Message::widget(Widget::ContactCard));
            self.advance_act(Act::All);
        }

        if let Some(act) = reply.advance_act {
            self.advance_act(act);
        }

        for queue in reply.pending_video_queues {
            let widget = if queue.kind == DisplayKind::Hero && queue.video_ids.len() == 1 {
                Widget::HeroPlayer {
                    video_id: queue.video_ids[0].clone(),
                }
            } else {
                Widget::VideoGallery {
                    video_ids: queue.video_ids,
                }
            };
            self.push(state, Message::widget(widget));
        }
    }

    /// Landing entry point: plays the scripted Act-1 failure and moves to chat.
    pub async fn submit_landing_idea(&self, idea: &str) -> TurnOutcome {
        let idea = idea.trim().to_string();
        let (generation, widget_id) = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Landing {
                return TurnOutcome::Rejected(TurnRejection::WrongPhase);
            }
            if Self::is_busy(&state) {
                return TurnOutcome::Rejected(TurnRejection::Busy);
            }
            if idea.is_empty() {
                return TurnOutcome::Rejected(TurnRejection::EmptyInput);
            }
            if let Err(rejection) = self.check_budget(&mut state) {
                return TurnOutcome::Rejected(rejection);
            }

            state.running_act1 = true;
            self.push(&mut state, Message::user(idea.clone()));
            let widget = Message::widget(Widget::Act1Fail {
                idea: idea.clone(),
                title: None,
                script: None,
            });
            let widget_id = widget.id.clone();
            self.push(&mut state, widget);
            (state.generation, widget_id)
        };

        tracing::info!("Running Act 1 for idea {:?}", idea);
        let (title, script, degraded) = match self.router.transport().generate_act1(&idea).await {
            Ok(response) => {
                let title = response.title.clone().filter(|t| !t.trim().is_empty());
                match response.script_lines() {
                    Some(lines) => (title, lines, false),
                    None => {
                        tracing::warn!("Act-1 response had no script, using fallback");
                        (title, fallback_script(), true)
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Act-1 generation failed: {:#}", e);
                (None, fallback_script(), true)
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return TurnOutcome::Discarded;
            }
            let updated = state.messages.iter_mut().find(|m| m.id == widget_id).map(|m| {
                m.body = MessageBody::Widget {
                    widget: Widget::Act1Fail {
                        idea: idea.clone(),
                        title: title.clone(),
                        script: Some(script.clone()),
                    },
                };
                m.clone()
            });
            if let Some(message) = updated {
                self.emit(ControllerEvent::MessageUpdated(message));
            }
        }

        for index in 0..script.len() {
            self.pacer.pause(SCRIPT_LINE_DELAY).await;
            let state = self.state.lock().await;
            if state.generation != generation {
                return TurnOutcome::Discarded;
            }
            self.emit(ControllerEvent::ScriptLineRevealed {
                message_id: widget_id.clone(),
                index,
            });
        }

        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return TurnOutcome::Discarded;
            }
            self.push(&mut state, Message::assistant(ACT1_REACTION, Vec::new()));
            let chips = act1_chips();
            self.push(&mut state, Message::assistant(ACT1_OFFER, chips.clone()));
            self.set_chips(&mut state, chips);
            state.log = seeded_log(&idea);
            self.progress.mark_landing_complete();
            self.advance_act(Act::One);
            state.phase = Phase::Chat;
            state.running_act1 = false;
            self.emit(ControllerEvent::PhaseChanged(Phase::Chat));
            tracing::info!("Act 1 finished, entering chat");
        }

        self.flush_pending_nudges().await;
        if degraded {
            TurnOutcome::Degraded
        } else {
            TurnOutcome::Completed
        }
    }

    pub async fn submit_message(&self, text: &str) -> TurnOutcome {
        let text = text.trim();
        let turn = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Chat {
                return TurnOutcome::Rejected(TurnRejection::WrongPhase);
            }
            if Self::is_busy(&state) {
                return TurnOutcome::Rejected(TurnRejection::Busy);
            }
            if text.is_empty() {
                return TurnOutcome::Rejected(TurnRejection::EmptyInput);
            }
            if let Err(rejection) = self.check_budget(&mut state) {
                return TurnOutcome::Rejected(rejection);
            }

            self.push(&mut state, Message::user(text));
            let synthetic = self
                .nudges
                .register_action(self.progress.get(), ActionKind::Chat)
                .map(|template| {
                    tracing::debug!("Steering turn with {}", template.key());
                    template.instruction().to_string()
                });
            self.begin_turn(&mut state, TurnKind::Chat, text.to_string(), synthetic)
        };

        let outcome = self.dispatch(turn).await;
        self.flush_pending_nudges().await;
        outcome
    }

    /// Suggested-reply click: a short cosmetic pause, then a normal message.
    pub async fn click_chip(&self, text: &str) -> TurnOutcome {
        self.pacer.pause(CHIP_CLICK_DELAY).await;
        self.submit_message(text).await
    }

    /// Runs a context-only turn about the opened video, then shows the player
    /// whatever the turn's outcome.
    pub async fn open_video(&self, video_id: &str) -> TurnOutcome {
        let Some(video) = self.catalog.find(video_id) else {
            tracing::warn!("Ignoring request to open unknown video {}", video_id);
            return TurnOutcome::Rejected(TurnRejection::NotEligible);
        };

        let turn = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Chat {
                return TurnOutcome::Rejected(TurnRejection::WrongPhase);
            }
            if Self::is_busy(&state) {
                return TurnOutcome::Rejected(TurnRejection::Busy);
            }
            if let Err(rejection) = self.check_budget(&mut state) {
                return TurnOutcome::Rejected(rejection);
            }

            let opens = self.progress.bump_video_opens();
            tracing::debug!("Opening video {} (open #{})", video.id, opens);

            let mut synthetic = VIDEO_OPENED_INSTRUCTION.to_string();
            if let Some(template) = self
                .nudges
                .register_action(self.progress.get(), ActionKind::Video)
            {
                tracing::debug!("Steering video turn with {}", template.key());
                synthetic.push('\n');
                synthetic.push_str(template.instruction());
            }

            self.begin_turn(
                &mut state,
                TurnKind::OpenVideo {
                    video_id: video.id.clone(),
                },
                video_opened_context(&video.id, Some(video.title.as_str())),
                Some(synthetic),
            )
        };

        let outcome = self.dispatch(turn).await;
        self.flush_pending_nudges().await;
        outcome
    }

    pub async fn handle_idle_timeout(&self) -> TurnOutcome {
        let turn = {
            let mut state = self.state.lock().await;
            if !Self::idle_eligible(&state) {
                return TurnOutcome::Rejected(TurnRejection::NotEligible);
            }
            tracing::debug!("Visitor idle, prompting the router");
            self.begin_turn(&mut state, TurnKind::Idle, IDLE_PROMPT.to_string(), None)
        };

        let outcome = self.dispatch(turn).await;
        self.flush_pending_nudges().await;
        outcome
    }

    /// Feeds a player event to the engagement tracker and sends whatever
    /// nudges can go out now. Returns how many nudge turns ran.
    pub async fn observe_video(&self, event: VideoEvent) -> usize {
        let raised = {
            let mut state = self.state.lock().await;
            state.video_nudges.observe(&event)
        };
        if raised {
            self.flush_pending_nudges().await
        } else {
            0
        }
    }

    /// Sends queued engagement nudges one at a time while the controller is
    /// free. Nudges stay queued while busy.
    async fn flush_pending_nudges(&self) -> usize {
        let mut sent = 0;
        loop {
            let turn = {
                let mut state = self.state.lock().await;
                if !Self::engagement_eligible(&state) {
                    break;
                }
                let Some(nudge) = state.video_nudges.take_pending() else {
                    break;
                };
                tracing::debug!("Sending engagement nudge {:?} for {}", nudge.kind, nudge.video_id);
                self.begin_turn(
                    &mut state,
                    TurnKind::Engagement,
                    nudge.context_line(),
                    Some(nudge.instruction()),
                )
            };

            if self.dispatch(turn).await == TurnOutcome::Discarded {
                break;
            }
            sent += 1;
        }
        sent
    }

    pub async fn set_video_playing(&self, playing: bool) {
        self.state.lock().await.video_playing = playing;
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let state = self.state.lock().await;
        ControllerSnapshot {
            phase: state.phase,
            messages: state.messages.clone(),
            chips: state.chips.clone(),
            typing: state.typing,
            running_act1: state.running_act1,
            dark_mode: state.dark_mode,
            video_playing: state.video_playing,
            act: self.progress.get(),
            actions_used: state.budget.used(),
            log_len: state.log.len(),
        }
    }

    /// Forgets the session and returns to landing. Turns still in flight are
    /// discarded when they complete.
    pub async fn reset_session(&self) {
        let mut state = self.state.lock().await;
        self.progress.reset();
        self.nudges.reset();

        state.generation += 1;
        state.messages.clear();
        state.log.clear();
        state.budget.reset();
        state.video_nudges = VideoNudges::new();
        state.running_act1 = false;
        state.phase = Phase::Landing;
        self.set_typing(&mut state, false);
        self.set_chips(&mut state, Vec::new());
        if state.dark_mode {
            state.dark_mode = false;
            self.emit(ControllerEvent::DarkModeChanged(false));
        }
        self.emit(ControllerEvent::PhaseChanged(Phase::Landing));
        self.emit(ControllerEvent::ActChanged(Act::None));
        tracing::info!("Session reset (generation {})", state.generation);
    }
}

#[async_trait]
impl IdleHandler for ConversationController {
    async fn is_eligible(&self) -> bool {
        Self::idle_eligible(&*self.state.lock().await)
    }

    async fn on_idle(&self) -> Result<()> {
        match self.handle_idle_timeout().await {
            TurnOutcome::Degraded => anyhow::bail!("idle turn fell back"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::catalog;
    use crate::nudge::NudgeTemplate;
    use crate::pacing::RecordingPacer;
    use crate::router::tests::{text_response, tool_response, ScriptedTransport};
    use crate::router::transport::Act1Response;
    use crate::storage::MemorySessionStore;
    use std::time::Duration;

    struct Harness {
        controller: Arc<ConversationController>,
        transport: Arc<ScriptedTransport>,
        pacer: Arc<RecordingPacer>,
        durable: Arc<MemorySessionStore>,
        tab: Arc<MemorySessionStore>,
        events: flume::Receiver<ControllerEvent>,
    }

    impl Harness {
        fn build(
            transport: ScriptedTransport,
            durable: Arc<MemorySessionStore>,
            skip_landing: bool,
        ) -> Self {
            let transport = Arc::new(transport);
            let pacer = Arc::new(RecordingPacer::new());
            let tab = Arc::new(MemorySessionStore::new());
            let (tx, rx) = flume::unbounded();
            let controller = Arc::new(ConversationController::new(
                ControllerDeps {
                    transport: transport.clone(),
                    catalog: Arc::new(catalog(&["v1", "v2", "v3"])),
                    durable_store: durable.clone(),
                    tab_store: tab.clone(),
                    pacer: pacer.clone(),
                    events: tx,
                },
                ControllerOptions { skip_landing },
            ));
            Self {
                controller,
                transport,
                pacer,
                durable,
                tab,
                events: rx,
            }
        }

        fn landing(transport: ScriptedTransport) -> Self {
            Self::build(transport, Arc::new(MemorySessionStore::new()), false)
        }

        fn chat(transport: ScriptedTransport) -> Self {
            Self::build(transport, Arc::new(MemorySessionStore::new()), true)
        }

        fn progress(&self) -> SessionProgress {
            SessionProgress::new(self.durable.clone(), self.tab.clone())
        }

        fn drain_events(&self) -> Vec<ControllerEvent> {
            self.events.try_iter().collect()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn landing_idea_plays_act1_and_enters_chat() {
        let transport = ScriptedTransport::new();
        transport.push_act1(Ok(Act1Response {
            title: Some("Moon Dogs".to_string()),
            script: Some(vec![
                "FADE IN: the moon.".to_string(),
                "A dog floats by.".to_string(),
                "It barks. No sound. Space.".to_string(),
            ]),
            text: None,
        }));
        let h = Harness::landing(transport);

        let outcome = h.controller.submit_landing_idea("dogs on the moon").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(h.transport.ideas(), vec!["dogs on the moon"]);

        let snap = h.controller.snapshot().await;
        assert_eq!(snap.phase, Phase::Chat);
        assert_eq!(snap.act, Act::One);
        assert_eq!(snap.messages.len(), 4);
        assert_eq!(snap.messages[0].body, MessageBody::User {
            text: "dogs on the moon".to_string()
        });
        let Some(Widget::Act1Fail { title, script, .. }) = snap.messages[1].as_widget() else {
            panic!("expected act1_fail widget");
        };
        assert_eq!(title.as_deref(), Some("Moon Dogs"));
        assert_eq!(script.as_ref().map(Vec::len), Some(3));

        assert_eq!(snap.assistant_texts(), vec![ACT1_REACTION, ACT1_OFFER]);
        let MessageBody::Assistant { chips, .. } = &snap.messages[3].body else {
            panic!("expected assistant offer");
        };
        assert_eq!(chips, &act1_chips());
        assert_eq!(snap.chips, act1_chips());

        assert_eq!(h.pacer.pauses(), vec![SCRIPT_LINE_DELAY; 3]);
        assert!(h.progress().landing_complete());
        assert_eq!(snap.log_len, 2);

        let revealed: Vec<usize> = h
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::ScriptLineRevealed { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(revealed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn landing_falls_back_to_fixed_script() {
        let transport = ScriptedTransport::new();
        transport.push_act1(Err(anyhow::anyhow!("act1 endpoint down")));
        let h = Harness::landing(transport);

        assert_eq!(
            h.controller.submit_landing_idea("cats in space").await,
            TurnOutcome::Degraded
        );
        let snap = h.controller.snapshot().await;
        let Some(Widget::Act1Fail { script, .. }) = snap.messages[1].as_widget() else {
            panic!("expected act1_fail widget");
        };
        assert_eq!(script.clone(), Some(fallback_script()));
        assert_eq!(snap.phase, Phase::Chat);
    }

    #[tokio::test]
    async fn phase_gates_entry_points() {
        let h = Harness::landing(ScriptedTransport::new());
        assert_eq!(
            h.controller.submit_message("hi").await,
            TurnOutcome::Rejected(TurnRejection::WrongPhase)
        );
        assert_eq!(
            h.controller.submit_landing_idea("   ").await,
            TurnOutcome::Rejected(TurnRejection::EmptyInput)
        );
        assert_eq!(
            h.controller.handle_idle_timeout().await,
            TurnOutcome::Rejected(TurnRejection::NotEligible)
        );

        let h = Harness::chat(ScriptedTransport::new());
        assert_eq!(
            h.controller.submit_landing_idea("again").await,
            TurnOutcome::Rejected(TurnRejection::WrongPhase)
        );
        assert_eq!(
            h.controller.submit_message("  ").await,
            TurnOutcome::Rejected(TurnRejection::EmptyInput)
        );
        assert_eq!(h.controller.snapshot().await.actions_used, 0);
    }

    #[tokio::test]
    async fn returning_visitor_skips_landing() {
        let durable = Arc::new(MemorySessionStore::new());
        SessionProgress::new(durable.clone(), Arc::new(MemorySessionStore::new()))
            .mark_landing_complete();
        let h = Harness::build(ScriptedTransport::new(), durable, false);

        let snap = h.controller.snapshot().await;
        assert_eq!(snap.phase, Phase::Chat);
        assert_eq!(snap.assistant_texts(), vec![WELCOME_BACK]);
        assert_eq!(snap.chips, act1_chips());
        assert_eq!(snap.act, Act::One);
    }

    #[tokio::test]
    async fn each_turn_extends_the_stored_log() {
        let transport = ScriptedTransport::new();
        transport.push_text("first reply").push_text("second reply");
        let h = Harness::chat(transport);

        assert_eq!(h.controller.submit_message("one").await, TurnOutcome::Completed);
        assert_eq!(h.controller.submit_message("two").await, TurnOutcome::Completed);

        let inputs = h.transport.inputs();
        assert_eq!(inputs[0], vec![LogEntry::user("one")]);
        assert_eq!(
            inputs[1],
            vec![
                LogEntry::user("one"),
                LogEntry::assistant("first reply"),
                LogEntry::user("two"),
            ]
        );

        let snap = h.controller.snapshot().await;
        assert!(!snap.typing);
        assert_eq!(snap.log_len, 4);
        assert_eq!(
            snap.assistant_texts(),
            vec![WELCOME_BACK, "first reply", "second reply"]
        );
    }

    #[tokio::test]
    async fn failed_turn_apologizes_and_clears_typing() {
        let transport = ScriptedTransport::new();
        transport.push_error("503 upstream");
        let h = Harness::chat(transport);

        assert_eq!(h.controller.submit_message("hello").await, TurnOutcome::Degraded);
        let snap = h.controller.snapshot().await;
        assert!(!snap.typing);
        assert_eq!(snap.assistant_texts().last(), Some(&APOLOGY));
        assert_eq!(snap.log_len, 0);

        let typing: Vec<bool> = h
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::TypingChanged(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(typing, vec![true, false]);
    }

    #[tokio::test]
    async fn budget_allows_exactly_twenty_five_actions() {
        let transport = ScriptedTransport::new();
        for i in 0..budget::MAX_ACTIONS {
            transport.push_text(&format!("reply {}", i));
        }
        let h = Harness::chat(transport);

        for i in 0..budget::MAX_ACTIONS {
            assert_eq!(
                h.controller.submit_message(&format!("msg {}", i)).await,
                TurnOutcome::Completed
            );
        }
        for _ in 0..3 {
            assert_eq!(
                h.controller.submit_message("one more").await,
                TurnOutcome::Rejected(TurnRejection::BudgetExhausted)
            );
        }
        assert_eq!(
            h.controller.open_video("v1").await,
            TurnOutcome::Rejected(TurnRejection::BudgetExhausted)
        );
        assert_eq!(
            h.controller.handle_idle_timeout().await,
            TurnOutcome::Rejected(TurnRejection::NotEligible)
        );

        let snap = h.controller.snapshot().await;
        let limits = snap
            .assistant_texts()
            .into_iter()
            .filter(|text| *text == LIMIT_REACHED)
            .count();
        assert_eq!(limits, 1);
        assert_eq!(h.transport.inputs().len(), budget::MAX_ACTIONS as usize);
    }

    #[tokio::test]
    async fn act1_nudge_decorates_the_eighth_action() {
        let transport = ScriptedTransport::new();
        for _ in 0..8 {
            transport.push_text("ok");
        }
        let h = Harness::chat(transport);
        for i in 0..8 {
            h.controller.submit_message(&format!("msg {}", i)).await;
        }

        let inputs = h.transport.inputs();
        assert_eq!(inputs[6].last(), Some(&LogEntry::user("msg 6")));
        let last = &inputs[7];
        assert_eq!(last[last.len() - 2], LogEntry::user("msg 7"));
        assert_eq!(
            last[last.len() - 1],
            LogEntry::user(NudgeTemplate::Act1FirstChat.instruction())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_message_while_typing_is_rejected() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(2));
        transport.push_text("slow reply");
        let h = Harness::chat(transport);

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.submit_message("first").await });
        settle().await;

        assert!(h.controller.snapshot().await.typing);
        assert_eq!(
            h.controller.submit_message("second").await,
            TurnOutcome::Rejected(TurnRejection::Busy)
        );
        assert_eq!(
            h.controller.open_video("v1").await,
            TurnOutcome::Rejected(TurnRejection::Busy)
        );

        assert_eq!(first.await.unwrap(), TurnOutcome::Completed);
        assert_eq!(h.transport.inputs().len(), 1);
        assert_eq!(h.controller.snapshot().await.actions_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_in_flight_turn() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(2));
        transport.push_text("too late");
        let h = Harness::chat(transport);

        let controller = h.controller.clone();
        let pending = tokio::spawn(async move { controller.submit_message("hello").await });
        settle().await;

        h.controller.reset_session().await;
        assert_eq!(pending.await.unwrap(), TurnOutcome::Discarded);

        let snap = h.controller.snapshot().await;
        assert_eq!(snap.phase, Phase::Landing);
        assert!(snap.messages.is_empty());
        assert!(!snap.typing);
        assert_eq!(snap.actions_used, 0);
        assert_eq!(snap.act, Act::None);
        assert!(!h.progress().landing_complete());
    }

    #[tokio::test]
    async fn open_video_shows_player_even_when_turn_fails() {
        let transport = ScriptedTransport::new();
        transport.push_error("timeout");
        let h = Harness::chat(transport);

        assert_eq!(h.controller.open_video("v2").await, TurnOutcome::Degraded);
        assert_eq!(h.progress().video_opens(), 1);

        let snap = h.controller.snapshot().await;
        assert!(!snap.messages.iter().any(Message::is_user));
        assert_eq!(snap.assistant_texts().last(), Some(&VIDEO_RETRY));
        assert_eq!(
            snap.messages.last().and_then(Message::as_widget),
            Some(&Widget::HeroPlayer {
                video_id: "v2".to_string()
            })
        );

        let inputs = h.transport.inputs();
        let sent = &inputs[0];
        assert_eq!(
            sent[0],
            LogEntry::user(video_opened_context("v2", Some("Video v2")))
        );
        assert_eq!(sent[1], LogEntry::user(VIDEO_OPENED_INSTRUCTION));

        assert_eq!(
            h.controller.open_video("nope").await,
            TurnOutcome::Rejected(TurnRejection::NotEligible)
        );
    }

    #[tokio::test]
    async fn reply_effects_become_widgets_and_events() {
        let transport = ScriptedTransport::new();
        let mut follow_up = text_response(r#"{"text":"Meet Michael!","chips":["Contact him"]}"#);
        follow_up.show_profile_card = Some(true);
        follow_up.dark_mode_enabled = Some(true);
        follow_up.show_all_videos = Some(true);
        transport.push(tool_response("c1", &["v3"])).push(follow_up);
        let h = Harness::chat(transport);
        h.drain_events();

        assert_eq!(h.controller.submit_message("who made these?").await, TurnOutcome::Completed);

        let snap = h.controller.snapshot().await;
        assert_eq!(snap.chips, vec!["Contact him".to_string()]);
        assert!(snap.dark_mode);
        assert_eq!(snap.act, Act::Two);
        assert_eq!(
            snap.widgets(),
            vec![
                &Widget::MegaCard {
                    video_ids: vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]
                },
                &Widget::ProfileCard,
                &Widget::HeroPlayer {
                    video_id: "v3".to_string()
                },
            ]
        );

        let status: Vec<&str> = snap
            .messages
            .iter()
            .filter(|m| matches!(m.body, MessageBody::SystemLog { .. }))
            .filter_map(Message::text)
            .collect();
        assert_eq!(status, vec![DARK_MODE_ON]);

        let events = h.drain_events();
        assert!(events.contains(&ControllerEvent::DarkModeChanged(true)));
        assert!(events.contains(&ControllerEvent::ActChanged(Act::Two)));
    }

    #[tokio::test]
    async fn idle_turn_has_no_user_bubble_and_respects_playback() {
        let transport = ScriptedTransport::new();
        transport.push_text("Psst, want a video?");
        let h = Harness::chat(transport);

        h.controller.set_video_playing(true).await;
        assert!(!h.controller.is_eligible().await);
        assert_eq!(
            h.controller.handle_idle_timeout().await,
            TurnOutcome::Rejected(TurnRejection::NotEligible)
        );

        h.controller.set_video_playing(false).await;
        assert!(h.controller.is_eligible().await);
        assert!(h.controller.on_idle().await.is_ok());

        let snap = h.controller.snapshot().await;
        assert!(!snap.messages.iter().any(Message::is_user));
        assert_eq!(snap.assistant_texts().last(), Some(&"Psst, want a video?"));
        assert_eq!(snap.actions_used, 0);
        assert_eq!(h.transport.inputs()[0], vec![LogEntry::user(IDLE_PROMPT)]);

        // No scripted response left: the idle turn degrades silently.
        assert!(h.controller.on_idle().await.is_err());
        let after = h.controller.snapshot().await;
        assert_eq!(after.messages.len(), snap.messages.len());
    }

    #[tokio::test]
    async fn engagement_nudge_runs_immediately_when_free() {
        let transport = ScriptedTransport::new();
        transport.push_text("Too loud?");
        let h = Harness::chat(transport);

        let sent = h
            .controller
            .observe_video(VideoEvent::Muted {
                video_id: "v1".to_string(),
            })
            .await;
        assert_eq!(sent, 1);

        let inputs = h.transport.inputs();
        let input = &inputs[0];
        let LogEntry::Message { content, .. } = &input[0] else {
            panic!("expected context message");
        };
        assert!(content.contains("muted"));

        // Second mute is a spent category.
        let sent = h
            .controller
            .observe_video(VideoEvent::Muted {
                video_id: "v2".to_string(),
            })
            .await;
        assert_eq!(sent, 0);
        assert_eq!(h.transport.inputs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn engagement_nudge_waits_for_current_turn() {
        let transport = ScriptedTransport::with_delay(Duration::from_secs(1));
        transport.push_text("Here's my answer").push_text("Oh, you muted it!");
        let h = Harness::chat(transport);

        let controller = h.controller.clone();
        let chat = tokio::spawn(async move { controller.submit_message("tell me more").await });
        settle().await;

        let sent = h
            .controller
            .observe_video(VideoEvent::Muted {
                video_id: "v1".to_string(),
            })
            .await;
        assert_eq!(sent, 0);

        assert_eq!(chat.await.unwrap(), TurnOutcome::Completed);
        let inputs = h.transport.inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1][0], LogEntry::user("tell me more"));
        assert_eq!(inputs[1][1], LogEntry::assistant("Here's my answer"));

        let snap = h.controller.snapshot().await;
        assert_eq!(
            snap.assistant_texts(),
            vec![WELCOME_BACK, "Here's my answer", "Oh, you muted it!"]
        );
        assert!(!snap.typing);
    }

    #[tokio::test]
    async fn nudge_raised_during_landing_goes_out_after_act1() {
        let transport = ScriptedTransport::new();
        transport.push_act1(Ok(Act1Response {
            title: Some("Moon Dogs".to_string()),
            script: Some(vec!["FADE IN: the moon.".to_string()]),
            text: None,
        }));
        transport.push_text("Too quiet up there?");
        let h = Harness::landing(transport);

        let sent = h
            .controller
            .observe_video(VideoEvent::Muted {
                video_id: "v1".to_string(),
            })
            .await;
        assert_eq!(sent, 0);
        assert!(h.transport.inputs().is_empty());

        assert_eq!(
            h.controller.submit_landing_idea("dogs on the moon").await,
            TurnOutcome::Completed
        );
        let inputs = h.transport.inputs();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].iter().any(|entry| matches!(
            entry,
            LogEntry::Message { content, .. } if content.contains("muted")
        )));

        let snap = h.controller.snapshot().await;
        assert_eq!(
            snap.assistant_texts(),
            vec![ACT1_REACTION, ACT1_OFFER, "Too quiet up there?"]
        );
        assert!(!snap.typing);
    }

    #[tokio::test]
    async fn chip_click_pauses_then_submits() {
        let transport = ScriptedTransport::new();
        transport.push_text("Michael is a filmmaker.");
        let h = Harness::chat(transport);

        assert_eq!(
            h.controller.click_chip("Michael? Whos' that?").await,
            TurnOutcome::Completed
        );
        assert_eq!(h.pacer.pauses(), vec![CHIP_CLICK_DELAY]);
        assert_eq!(
            h.transport.inputs()[0],
            vec![LogEntry::user("Michael? Whos' that?")]
        );
    }
}
