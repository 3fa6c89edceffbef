//! Drives a bot from a client's events.
//!
//! Each `GameStep` is handed to the bot as JSON state; the bot's answer is
//! dispatched locally as `ClientSend` and forwarded to the server.
//! `GameFinished` kills the bot.

use std::sync::Arc;

use mozaic_proto::events::{
    CLIENT_SEND, ClientSend, GAME_FINISHED, GAME_STEP, GameFinished, GameStep,
};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info};

use crate::{bus::Subscription, client::Client, error::ClientError};

/// Callback receiving the bot's answer to one request.
pub type Respond = Box<dyn FnOnce(String) + Send>;

/// A running bot process, or anything that behaves like one.
pub trait BotRunner: Send + 'static {
    /// Start the bot with match metadata (JSON).
    fn run(&mut self, meta: &str) -> anyhow::Result<()>;

    /// Ask the bot for its move in `state`. `respond` may be called later,
    /// from any thread, or not at all.
    fn request(&mut self, state: &str, respond: Respond);

    fn kill(&mut self);
}

/// A bot wired to one client.
pub struct BotSession<B: BotRunner> {
    client: Client,
    client_id: u32,
    bot: Arc<Mutex<B>>,
    subscriptions: Vec<Subscription>,
}

impl<B: BotRunner> BotSession<B> {
    pub fn attach(client: &Client, client_id: u32, bot: B) -> Result<Self, ClientError> {
        let bot = Arc::new(Mutex::new(bot));
        let mut subscriptions = Vec::with_capacity(3);

        let weak = client.downgrade();
        let step_bot = bot.clone();
        subscriptions.push(client.on(&GAME_STEP, move |step: &GameStep| {
            let state = serde_json::to_string(&step.state)?;
            debug!(client_id, turn = step.turn_num, "requesting bot move");
            let weak = weak.clone();
            step_bot.lock().request(
                &state,
                Box::new(move |data| {
                    if let Some(client) = weak.upgrade() {
                        client.bus().dispatch(&CLIENT_SEND.create(ClientSend { data }));
                    }
                }),
            );
            Ok(())
        })?);

        let weak = client.downgrade();
        subscriptions.push(client.on(&CLIENT_SEND, move |send: &ClientSend| {
            let client = weak
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("client dropped"))?;
            client.send(&CLIENT_SEND.create(send.clone()))?;
            Ok(())
        })?);

        let finish_bot = bot.clone();
        subscriptions.push(client.on(&GAME_FINISHED, move |finished: &GameFinished| {
            info!(client_id, turn = finished.turn_num, "game finished, stopping bot");
            finish_bot.lock().kill();
            Ok(())
        })?);

        Ok(Self {
            client: client.clone(),
            client_id,
            bot,
            subscriptions,
        })
    }

    /// Start the bot with `{"player_number": client_id}`.
    pub fn start(&self) -> anyhow::Result<()> {
        let meta = json!({ "player_number": self.client_id }).to_string();
        info!(client_id = self.client_id, "starting bot");
        self.bot.lock().run(&meta)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn with_bot<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.bot.lock())
    }

    /// Unwire the bot from the client. The bot is not killed.
    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use mozaic_proto::events::{State, standard_registry};

    use super::*;

    #[derive(Default)]
    struct FakeBot {
        meta: Option<String>,
        states: Vec<String>,
        killed: bool,
    }

    impl BotRunner for FakeBot {
        fn run(&mut self, meta: &str) -> anyhow::Result<()> {
            self.meta = Some(meta.to_string());
            Ok(())
        }

        fn request(&mut self, state: &str, respond: Respond) {
            self.states.push(state.to_string());
            respond(format!("move {}", self.states.len()));
        }

        fn kill(&mut self) {
            self.killed = true;
        }
    }

    fn client() -> Client {
        Client::new(Arc::new(standard_registry().unwrap()))
    }

    #[test]
    fn start_passes_player_number() {
        let client = client();
        let session = BotSession::attach(&client, 3, FakeBot::default()).unwrap();
        session.start().unwrap();
        session.with_bot(|bot| {
            assert_eq!(bot.meta.as_deref(), Some(r#"{"player_number":3}"#));
        });
    }

    #[test]
    fn step_answer_is_dispatched_as_client_send() {
        let client = client();
        let session = BotSession::attach(&client, 1, FakeBot::default()).unwrap();

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let s = sent.clone();
        client
            .on(&CLIENT_SEND, move |send: &ClientSend| {
                s.lock().unwrap().push(send.data.clone());
                Ok(())
            })
            .unwrap()
            .detach();

        client.bus().dispatch(&GAME_STEP.create(GameStep {
            turn_num: 1,
            state: State::default(),
        }));

        assert_eq!(*sent.lock().unwrap(), vec!["move 1"]);
        session.with_bot(|bot| {
            assert_eq!(bot.states, vec![r#"{"planets":[],"expeditions":[]}"#]);
        });
    }

    #[test]
    fn game_finished_kills_and_detach_unwires() {
        let client = client();
        let session = BotSession::attach(&client, 1, FakeBot::default()).unwrap();
        assert_eq!(client.bus().subscriber_count(GAME_STEP.id()), 1);

        client.bus().dispatch(&GAME_FINISHED.create(GameFinished {
            turn_num: 9,
            state: State::default(),
        }));
        session.with_bot(|bot| assert!(bot.killed));

        session.detach();
        assert_eq!(client.bus().subscriber_count(GAME_STEP.id()), 0);
        assert_eq!(client.bus().subscriber_count(CLIENT_SEND.id()), 0);
    }
}
