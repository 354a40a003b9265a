// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The synchronization engine.
//!
//! One task owns the message log, the presence signal, the supervisor and
//! the active conversation id. Commands from [`EngineHandle`], channel
//! signals from the supervisor, internal timers and finished
//! request/response calls all arrive on queues that this task drains one at
//! a time, so no state is ever mutated in parallel.
//!
//! Request/response calls run on their own tasks and report back as a
//! [`Completion`]; frames and timers keep being handled while one is
//! outstanding. Calls that change the conversation, and fallback sends, run
//! one at a time in arrival order.
//!
//! Observers read published snapshots through `watch` receivers; notices
//! are broadcast.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use parley_core::message::{Message, MessageId, PendingId, Sender, WireMessage};
use parley_core::protocol::ClientFrame;
use parley_core::{Countdown, MessageLog, Presence, PresenceSignal};

use super::api::{
    ApiError, ApiResult, ChatApi, ConversationSummary, HttpChatApi, SentReply, StartedConversation,
};
use super::dispatcher::{EventDispatcher, Notice, PresenceChange, Targets};
use super::router::{Route, TransportRouter};
use super::supervisor::{ChannelSignal, ConnectionState, ConnectionSupervisor};
use super::transport::{Transport, WebSocketTransport};
use crate::config::Config;
use crate::credential::CredentialProvider;
use crate::error::{Error, Result};

/// Delay between a reload request and the reload.
pub const RELOAD_DELAY: Duration = Duration::from_secs(1);

const COMMAND_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    Select {
        conversation_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StartNew {
        reply: oneshot::Sender<Result<String>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<()>>,
    },
    SetComposing {
        active: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Work that needs the request/response API. Run one at a time.
enum Job {
    Send {
        pending: PendingId,
        content: String,
        /// None for a resend the caller was already answered for.
        reply: Option<oneshot::Sender<Result<MessageId>>>,
    },
    Select {
        conversation_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    StartNew {
        reply: oneshot::Sender<Result<String>>,
    },
    ClearAll {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A request/response call that finished on its own task.
enum Completion {
    Sent {
        pending: PendingId,
        content: String,
        result: Result<Route>,
        reply: Option<oneshot::Sender<Result<MessageId>>>,
    },
    Selected {
        conversation_id: String,
        result: ApiResult<Vec<WireMessage>>,
        reply: oneshot::Sender<Result<()>>,
    },
    Started {
        result: ApiResult<StartedConversation>,
        reply: oneshot::Sender<Result<String>>,
    },
    Cleared {
        result: ApiResult<()>,
        reply: oneshot::Sender<Result<()>>,
    },
    Resynced {
        conversation_id: String,
        lost: Vec<Inflight>,
        result: ApiResult<Vec<WireMessage>>,
    },
    Reloaded {
        conversation_id: String,
        result: ApiResult<Vec<WireMessage>>,
    },
}

#[derive(Debug)]
enum Timer {
    PresenceExpired { epoch: u64 },
    ReloadDue { conversation_id: String },
}

/// A message written to the duplex channel and not yet echoed back.
#[derive(Debug)]
struct Inflight {
    pending: PendingId,
    content: String,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    api: Arc<dyn ChatApi>,
    messages: watch::Receiver<Vec<Message>>,
    connection: watch::Receiver<ConnectionState>,
    presence: watch::Receiver<Presence>,
    conversation: watch::Receiver<Option<String>>,
    notices: broadcast::Sender<Notice>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::EngineStopped)?;
        rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Sends a message in the active conversation, creating one if needed.
    ///
    /// The message is in the log as unconfirmed before any network call.
    /// Returns its confirmed id, or its pending id when it went over the
    /// duplex channel and the echo has not arrived yet.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyMessage`] for blank text; [`Error::SendFailed`] once
    /// every path failed, after the entry was removed from the log.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<MessageId> {
        let text = text.into();
        self.request(|reply| Command::Send { text, reply }).await
    }

    /// Switches to an existing conversation. Nothing changes if its
    /// history cannot be fetched.
    pub async fn select_conversation(&self, conversation_id: impl Into<String>) -> Result<()> {
        let conversation_id = conversation_id.into();
        self.request(|reply| Command::Select {
            conversation_id,
            reply,
        })
        .await
    }

    /// Starts an empty conversation and switches to it. Returns its id.
    pub async fn start_new_conversation(&self) -> Result<String> {
        self.request(|reply| Command::StartNew { reply }).await
    }

    /// Deletes every conversation and resets the engine to no conversation.
    pub async fn clear_all_conversations(&self) -> Result<()> {
        self.request(|reply| Command::ClearAll { reply }).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.api.list_conversations().await?)
    }

    /// Tells the counterpart whether the user is composing. Only sent over
    /// a connected duplex channel; never reported as an error.
    pub async fn set_composing(&self, active: bool) {
        if self.commands.send(Command::SetComposing { active }).await.is_err() {
            tracing::debug!("engine stopped, composing state dropped");
        }
    }

    /// Stops the engine, closing the channel and cancelling every timer.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn presence(&self) -> Presence {
        *self.presence.borrow()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<Presence> {
        self.presence.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation.borrow().clone()
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<Option<String>> {
        self.conversation.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

/// Engine state, owned by its task.
pub struct Engine {
    api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialProvider>,
    router: TransportRouter,
    supervisor: ConnectionSupervisor,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    dispatcher: EventDispatcher,
    log: MessageLog,
    presence: PresenceSignal,
    conversation: Option<String>,
    inflight: VecDeque<Inflight>,
    jobs: VecDeque<Job>,
    job_running: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    /// Parent of every timer tied to the active conversation.
    timers: CancellationToken,
    presence_timer: Option<CancellationToken>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
    duplex_disabled: bool,
    messages_tx: watch::Sender<Vec<Message>>,
    presence_tx: watch::Sender<Presence>,
    conversation_tx: watch::Sender<Option<String>>,
    notices: broadcast::Sender<Notice>,
}

impl Engine {
    /// Starts an engine on the current tokio runtime.
    pub fn spawn(
        config: &Config,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> EngineHandle {
        let (supervisor, signals) = ConnectionSupervisor::new(transport, config.duplex.clone());
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (messages_tx, messages) = watch::channel(Vec::new());
        let (presence_tx, presence) = watch::channel(Presence::default());
        let (conversation_tx, conversation) = watch::channel(None);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let handle = EngineHandle {
            commands,
            api: Arc::clone(&api),
            messages,
            connection: supervisor.subscribe(),
            presence,
            conversation,
            notices: notices.clone(),
        };

        let engine = Engine {
            router: TransportRouter::new(Arc::clone(&api)),
            api,
            credentials,
            supervisor,
            signals,
            dispatcher: EventDispatcher::new(),
            log: MessageLog::new(),
            presence: PresenceSignal::new(config.presence_timeout()),
            conversation: None,
            inflight: VecDeque::new(),
            jobs: VecDeque::new(),
            job_running: false,
            completions_tx,
            completions_rx,
            timers: CancellationToken::new(),
            presence_timer: None,
            timer_tx,
            timer_rx,
            duplex_disabled: false,
            messages_tx,
            presence_tx,
            conversation_tx,
            notices,
        };
        tokio::spawn(engine.run(commands_rx));
        handle
    }

    /// Starts an engine against the configured HTTP and WebSocket endpoints.
    pub fn connect(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<EngineHandle> {
        let api = HttpChatApi::new(&config.api, Arc::clone(&credentials))?;
        Ok(Self::spawn(
            config,
            Arc::new(api),
            Arc::new(WebSocketTransport::new()),
            credentials,
        ))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("engine started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.stop();
                        return;
                    }
                },
                Some(signal) = self.signals.recv() => self.on_signal(signal).await,
                Some(done) = self.completions_rx.recv() => self.on_completion(done),
                Some(timer) = self.timer_rx.recv() => self.on_timer(timer),
            }
            self.settle().await;
        }
    }

    fn stop(&mut self) {
        tracing::debug!("engine stopping");
        self.reset_timers();
        self.supervisor.close();
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { text, reply } => {
                let content = text.trim();
                if content.is_empty() {
                    let _ = reply.send(Err(Error::EmptyMessage));
                    return;
                }
                let content = content.to_string();
                let pending = self.log.append_optimistic(content.clone(), Utc::now());
                self.publish_messages();
                self.jobs.push_back(Job::Send {
                    pending,
                    content,
                    reply: Some(reply),
                });
            }
            Command::Select {
                conversation_id,
                reply,
            } => self.jobs.push_back(Job::Select {
                conversation_id,
                reply,
            }),
            Command::StartNew { reply } => self.jobs.push_back(Job::StartNew { reply }),
            Command::ClearAll { reply } => self.jobs.push_back(Job::ClearAll { reply }),
            Command::SetComposing { active } => {
                if self.supervisor.is_connected() {
                    let _ = self.supervisor.send_frame(ClientFrame::typing(active)).await;
                }
            }
            Command::Shutdown { .. } => {}
        }
    }

    /// Brings queued work and the channel bookkeeping up to date after any
    /// event.
    async fn settle(&mut self) {
        loop {
            self.check_channel();
            if self.job_running || self.jobs.is_empty() {
                return;
            }
            self.start_next_job().await;
        }
    }

    /// Starts the oldest job. A duplex send finishes here; everything else
    /// runs on its own task until its [`Completion`] arrives.
    async fn start_next_job(&mut self) {
        let Some(job) = self.jobs.pop_front() else {
            return;
        };
        match job {
            Job::Send {
                pending,
                content,
                reply,
            } => {
                let sent = self
                    .router
                    .try_duplex(&mut self.supervisor, self.conversation.as_deref(), &content)
                    .await;
                if sent {
                    self.inflight.push_back(Inflight { pending, content });
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(MessageId::Pending(pending)));
                    }
                    return;
                }
                let router = self.router.clone();
                let conversation = self.conversation.clone();
                self.spawn_job(async move {
                    let result = router.fallback(conversation.as_deref(), &content).await;
                    Completion::Sent {
                        pending,
                        content,
                        result,
                        reply,
                    }
                });
            }
            Job::Select {
                conversation_id,
                reply,
            } => {
                let api = Arc::clone(&self.api);
                self.spawn_job(async move {
                    let result = api.get_conversation(&conversation_id).await;
                    Completion::Selected {
                        conversation_id,
                        result,
                        reply,
                    }
                });
            }
            Job::StartNew { reply } => {
                let api = Arc::clone(&self.api);
                self.spawn_job(async move {
                    let result = api.start_conversation().await;
                    Completion::Started { result, reply }
                });
            }
            Job::ClearAll { reply } => {
                let api = Arc::clone(&self.api);
                self.spawn_job(async move {
                    let result = api.delete_conversations().await;
                    Completion::Cleared { result, reply }
                });
            }
        }
    }

    fn spawn_job(&mut self, call: impl Future<Output = Completion> + Send + 'static) {
        self.job_running = true;
        self.detach(call);
    }

    fn detach(&self, call: impl Future<Output = Completion> + Send + 'static) {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            // Gone after shutdown.
            let _ = completions.send(call.await);
        });
    }

    /// Pending ids of sends still waiting for their turn.
    fn queued_sends(&self) -> Vec<PendingId> {
        self.jobs
            .iter()
            .filter_map(|job| match job {
                Job::Send { pending, .. } => Some(*pending),
                _ => None,
            })
            .collect()
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Sent {
                pending,
                content,
                result,
                reply,
            } => {
                self.job_running = false;
                let result = self.absorb_route(pending, content, result);
                self.publish_messages();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Completion::Selected {
                conversation_id,
                result,
                reply,
            } => {
                self.job_running = false;
                let result = match result {
                    Ok(history) => {
                        self.switch_to(conversation_id, history);
                        Ok(())
                    }
                    Err(e) => Err(rejected_or(e, &conversation_id)),
                };
                let _ = reply.send(result);
            }
            Completion::Started { result, reply } => {
                self.job_running = false;
                let result = match result {
                    Ok(started) => {
                        let id = started.conversation_id.clone();
                        self.switch_to(started.conversation_id, started.messages);
                        Ok(id)
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Completion::Cleared { result, reply } => {
                self.job_running = false;
                let result = match result {
                    Ok(()) => {
                        tracing::info!("all conversations cleared");
                        self.leave_conversation();
                        let queued = self.queued_sends();
                        self.log.clear_except(&queued);
                        self.inflight.clear();
                        self.publish_messages();
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Completion::Resynced {
                conversation_id,
                lost,
                result,
            } => self.absorb_resync(&conversation_id, lost, result),
            Completion::Reloaded {
                conversation_id,
                result,
            } => {
                if self.conversation.as_deref() != Some(conversation_id.as_str()) {
                    return;
                }
                match result {
                    Ok(history) => {
                        let now = Utc::now();
                        self.log.replace_confirmed(
                            history.into_iter().map(|w| w.into_message(now)).collect(),
                        );
                        self.publish_messages();
                        tracing::debug!(conversation_id = %conversation_id, "conversation reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "conversation reload failed"),
                }
            }
        }
    }

    /// Folds the outcome of a fallback send into the log.
    fn absorb_route(
        &mut self,
        pending: PendingId,
        content: String,
        result: Result<Route>,
    ) -> Result<MessageId> {
        match result {
            Ok(Route::Duplex) => Ok(MessageId::Pending(pending)),
            Ok(Route::Created(started)) => Ok(self.absorb_started(pending, started)),
            Ok(Route::Sent {
                conversation_id,
                reply,
            }) => {
                tracing::debug!(conversation_id = %conversation_id, "message sent over fallback");
                Ok(self.absorb_reply(pending, &content, reply))
            }
            Ok(Route::Recreated { stale, started }) => {
                tracing::info!(
                    stale = %stale,
                    conversation_id = %started.conversation_id,
                    "conversation replaced"
                );
                let mut keep = self.queued_sends();
                keep.push(pending);
                self.log.clear_except(&keep);
                self.inflight.clear();
                self.leave_conversation();
                Ok(self.absorb_started(pending, started))
            }
            Err(e) => {
                self.log.remove_pending(pending);
                self.notify(Notice::SendFailed {
                    content,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Folds a created conversation into the log and makes it active.
    fn absorb_started(&mut self, pending: PendingId, started: StartedConversation) -> MessageId {
        let now = Utc::now();
        let mut confirmed = None;
        for wire in started.messages {
            let message = wire.into_message(now);
            if confirmed.is_none() && message.sender == Sender::User {
                confirmed = Some(message.id.clone());
                self.log.confirm_pending(pending, message);
            } else {
                self.log.append_confirmed(message);
            }
        }
        let id = match confirmed {
            Some(id) => id,
            None => {
                tracing::warn!("created conversation did not echo the first message");
                self.log.remove_pending(pending);
                MessageId::Pending(pending)
            }
        };
        self.adopt_conversation(started.conversation_id);
        id
    }

    fn absorb_reply(&mut self, pending: PendingId, content: &str, reply: SentReply) -> MessageId {
        let now = Utc::now();
        let user = WireMessage::new(reply.user_msg_id, Sender::User, content).into_message(now);
        let id = user.id.clone();
        self.log.confirm_pending(pending, user);
        if !reply.bot_msg_id.is_empty() {
            let bot = WireMessage::new(reply.bot_msg_id, Sender::Counterpart, reply.reply)
                .into_message(now);
            self.log.append_confirmed(bot);
        }
        id
    }

    /// Replaces the active conversation and its history. Sends still
    /// waiting for their turn keep their entries.
    fn switch_to(&mut self, conversation_id: String, history: Vec<WireMessage>) {
        tracing::info!(conversation_id = %conversation_id, "switching conversation");
        self.leave_conversation();
        let queued = self.queued_sends();
        self.log.clear_except(&queued);
        self.inflight.clear();
        let now = Utc::now();
        self.log
            .replace_confirmed(history.into_iter().map(|w| w.into_message(now)).collect());
        self.publish_messages();
        self.adopt_conversation(conversation_id);
    }

    /// Drops the active conversation: channel, timers and presence.
    fn leave_conversation(&mut self) {
        self.reset_timers();
        self.supervisor.close();
        if self.presence.clear() {
            self.publish_presence();
        }
        if self.conversation.take().is_some() {
            self.conversation_tx.send_replace(None);
        }
    }

    fn adopt_conversation(&mut self, conversation_id: String) {
        if self.conversation.as_deref() != Some(conversation_id.as_str()) {
            self.conversation = Some(conversation_id.clone());
            self.conversation_tx.send_replace(Some(conversation_id.clone()));
        }
        self.supervisor
            .open(&conversation_id, self.credentials.credential());
    }

    async fn on_signal(&mut self, signal: ChannelSignal) {
        if let Some(text) = self.supervisor.handle(signal).await {
            self.on_frame(&text).await;
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let out = self
            .dispatcher
            .dispatch(
                text,
                Targets {
                    log: &mut self.log,
                    presence: &mut self.presence,
                    supervisor: &mut self.supervisor,
                },
            )
            .await;

        if let Some(pending) = out.confirmed {
            self.inflight.retain(|i| i.pending != pending);
        }
        let mut messages_changed = out.messages_changed;

        match out.presence {
            Some(PresenceChange::Armed(countdown)) => {
                self.arm_presence(countdown);
                self.publish_presence();
            }
            Some(PresenceChange::Cleared) => {
                self.cancel_presence_timer();
                self.publish_presence();
            }
            None => {}
        }

        if out.server_error {
            if let Some(lost) = self.inflight.pop_front() {
                self.log.remove_pending(lost.pending);
                messages_changed = true;
                let reason = match &out.notice {
                    Some(Notice::Error(message)) => message.clone(),
                    _ => "server error".to_string(),
                };
                self.notify(Notice::SendFailed {
                    content: lost.content,
                    reason,
                });
            }
        }

        if out.reload {
            self.schedule_reload();
        }
        if messages_changed {
            self.publish_messages();
        }
        if let Some(notice) = out.notice {
            if matches!(notice, Notice::DuplexDisabled { .. }) {
                self.duplex_disabled = true;
            }
            self.notify(notice);
        }
    }

    /// Reacts to supervisor state the last step may have changed.
    fn check_channel(&mut self) {
        if self.supervisor.is_disabled() && !self.duplex_disabled {
            self.duplex_disabled = true;
            self.notify(Notice::DuplexDisabled {
                reason: "authentication unavailable".to_string(),
            });
        }
        if self.inflight.is_empty() || self.supervisor.is_connected() {
            return;
        }
        if self.supervisor.is_disabled() {
            self.resend_inflight();
        } else {
            self.resync_inflight();
        }
    }

    /// Duplex was refused for the session, so unechoed messages never got
    /// through. They go out again over request/response, ahead of anything
    /// queued.
    fn resend_inflight(&mut self) {
        tracing::info!(
            count = self.inflight.len(),
            "duplex disabled with unconfirmed messages, resending"
        );
        while let Some(entry) = self.inflight.pop_back() {
            self.jobs.push_front(Job::Send {
                pending: entry.pending,
                content: entry.content,
                reply: None,
            });
        }
    }

    /// The channel went away with unechoed messages: fetch history to learn
    /// which of them the server received.
    fn resync_inflight(&mut self) {
        let lost: Vec<Inflight> = self.inflight.drain(..).collect();
        let Some(conversation_id) = self.conversation.clone() else {
            return;
        };
        tracing::info!(count = lost.len(), "duplex dropped with unconfirmed messages, resyncing");
        let api = Arc::clone(&self.api);
        self.detach(async move {
            let result = api.get_conversation(&conversation_id).await;
            Completion::Resynced {
                conversation_id,
                lost,
                result,
            }
        });
    }

    fn absorb_resync(
        &mut self,
        conversation_id: &str,
        lost: Vec<Inflight>,
        result: ApiResult<Vec<WireMessage>>,
    ) {
        if self.conversation.as_deref() != Some(conversation_id) {
            // The switch already dropped these entries.
            return;
        }
        let reason = match result {
            Ok(history) => {
                let now = Utc::now();
                let history: Vec<Message> =
                    history.into_iter().map(|w| w.into_message(now)).collect();
                let mut unmatched: Vec<&str> = history
                    .iter()
                    .filter(|m| m.sender == Sender::User && !self.log.contains(&m.id))
                    .map(|m| m.content.as_str())
                    .collect();
                for entry in &lost {
                    self.log.remove_pending(entry.pending);
                    match unmatched.iter().position(|c| *c == entry.content) {
                        Some(idx) => {
                            unmatched.remove(idx);
                        }
                        None => self.notify(Notice::SendFailed {
                            content: entry.content.clone(),
                            reason: "connection lost before delivery".to_string(),
                        }),
                    }
                }
                self.log.replace_confirmed(history);
                self.publish_messages();
                return;
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!(error = %reason, "resync failed");
        for entry in lost {
            self.log.remove_pending(entry.pending);
            self.notify(Notice::SendFailed {
                content: entry.content,
                reason: reason.clone(),
            });
        }
        self.publish_messages();
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::PresenceExpired { epoch } => {
                if self.presence.expire(epoch) {
                    tracing::debug!("presence expired");
                    self.presence_timer = None;
                    self.publish_presence();
                }
            }
            Timer::ReloadDue { conversation_id } => {
                if self.conversation.as_deref() != Some(conversation_id.as_str()) {
                    return;
                }
                let api = Arc::clone(&self.api);
                self.detach(async move {
                    let result = api.get_conversation(&conversation_id).await;
                    Completion::Reloaded {
                        conversation_id,
                        result,
                    }
                });
            }
        }
    }

    fn arm_presence(&mut self, countdown: Countdown) {
        self.cancel_presence_timer();
        let token = self.timers.child_token();
        self.presence_timer = Some(token.clone());
        let timers = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(countdown.duration) => {
                    let _ = timers.send(Timer::PresenceExpired { epoch: countdown.epoch });
                }
            }
        });
    }

    fn cancel_presence_timer(&mut self) {
        if let Some(token) = self.presence_timer.take() {
            token.cancel();
        }
    }

    fn schedule_reload(&mut self) {
        let Some(conversation_id) = self.conversation.clone() else {
            return;
        };
        tracing::debug!(conversation_id = %conversation_id, "reload scheduled");
        let token = self.timers.child_token();
        let timers = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(RELOAD_DELAY) => {
                    let _ = timers.send(Timer::ReloadDue { conversation_id });
                }
            }
        });
    }

    /// Cancels every timer of the active conversation.
    fn reset_timers(&mut self) {
        self.timers.cancel();
        self.timers = CancellationToken::new();
        self.presence_timer = None;
    }

    fn publish_messages(&self) {
        self.messages_tx.send_replace(self.log.entries().to_vec());
    }

    fn publish_presence(&self) {
        let state = self.presence.state();
        self.presence_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn notify(&self, notice: Notice) {
        tracing::debug!(notice = %notice, "notice");
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

fn rejected_or(error: ApiError, conversation_id: &str) -> Error {
    if error.is_conversation_rejected() {
        Error::RemoteConversationInvalid(conversation_id.to_string())
    } else {
        Error::Api(error)
    }
}
