//! Scripted page source shared by the unit tests.

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time;

use crate::ports::{PagePort, ParseError, PortError};

pub(crate) enum Reply {
    Page(String),
    SlowPage(String, Duration),
    Fail,
    SlowFail(Duration),
    Hang,
}

/// Hands out queued replies in order; fails once the queue is exhausted.
pub(crate) struct ScriptedPort {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl ScriptedPort {
    pub(crate) fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PagePort for ScriptedPort {
    async fn fetch(&self) -> Result<String, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Page(page)) => Ok(page),
            Some(Reply::SlowPage(page, delay)) => {
                time::sleep(delay).await;
                Ok(page)
            }
            Some(Reply::SlowFail(delay)) => {
                time::sleep(delay).await;
                Err(PortError::Parse(ParseError::PayloadNotFound))
            }
            Some(Reply::Hang) => future::pending().await,
            Some(Reply::Fail) | None => Err(PortError::Parse(ParseError::PayloadNotFound)),
        }
    }
}

/// Minimal map page reporting the given `(registration number, fill degree)` pairs.
pub(crate) fn page(containers: &[(&str, u32)]) -> String {
    let model = containers
        .iter()
        .map(|(id, fill)| {
            format!(
                r#"{{"sRegistrationNumber":"{id}","dFillingDegree":{fill},"bIsOutOfUse":false,"dtDateLastEmptied":"/Date(1700000000000)/","sProductName":"Rest"}}"#
            )
        })
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"<html><body><div id="MapPartial"><script type="text/javascript">var oContainerModel =[{model}];</script></div></body></html>"#
    )
}
