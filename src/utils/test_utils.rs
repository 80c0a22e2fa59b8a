#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use tokio::sync::mpsc;

#[cfg(test)]
use crate::core::gateway::{FragmentStream, GatewayError, ModelGateway};
#[cfg(test)]
use crate::core::message::Turn;

#[cfg(test)]
pub type FragmentFeed = mpsc::UnboundedSender<Result<String, GatewayError>>;

#[cfg(test)]
enum StubReply {
    Scripted(Vec<Result<String, GatewayError>>),
    Channel(mpsc::UnboundedReceiver<Result<String, GatewayError>>),
    Refuse(GatewayError),
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub turns: Vec<Turn>,
    pub system_instruction: String,
}

/// Gateway double that replays queued replies in order and records every call.
/// With nothing queued it yields an empty stream.
#[cfg(test)]
#[derive(Default)]
pub struct StubGateway {
    replies: Mutex<VecDeque<StubReply>>,
    calls: Mutex<Vec<StubCall>>,
}

#[cfg(test)]
impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragments(&self, fragments: &[&str]) {
        self.push_script(fragments.iter().map(|f| Ok(f.to_string())).collect());
    }

    pub fn push_script(&self, items: Vec<Result<String, GatewayError>>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(StubReply::Scripted(items));
    }

    pub fn push_refusal(&self, error: GatewayError) {
        self.replies
            .lock()
            .unwrap()
            .push_back(StubReply::Refuse(error));
    }

    /// Queue a reply whose fragments are fed by the test as it runs.
    pub fn push_channel(&self) -> FragmentFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.replies
            .lock()
            .unwrap()
            .push_back(StubReply::Channel(rx));
        tx
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_reply(&self, turns: &[Turn], system_instruction: &str) -> Option<StubReply> {
        self.calls.lock().unwrap().push(StubCall {
            turns: turns.to_vec(),
            system_instruction: system_instruction.to_string(),
        });
        self.replies.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
#[async_trait]
impl ModelGateway for StubGateway {
    async fn stream(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<FragmentStream, GatewayError> {
        match self.next_reply(turns, system_instruction) {
            None => Ok(Box::pin(futures_util::stream::empty())),
            Some(StubReply::Scripted(items)) => Ok(Box::pin(futures_util::stream::iter(items))),
            Some(StubReply::Channel(rx)) => Ok(Box::pin(futures_util::stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
            Some(StubReply::Refuse(error)) => Err(error),
        }
    }

    async fn generate(
        &self,
        turns: &[Turn],
        system_instruction: &str,
    ) -> Result<String, GatewayError> {
        match self.next_reply(turns, system_instruction) {
            None => Ok(String::new()),
            Some(StubReply::Scripted(items)) => items.into_iter().collect(),
            Some(StubReply::Channel(mut rx)) => {
                let mut text = String::new();
                while let Some(item) = rx.recv().await {
                    text.push_str(&item?);
                }
                Ok(text)
            }
            Some(StubReply::Refuse(error)) => Err(error),
        }
    }
}
