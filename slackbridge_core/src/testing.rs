//! In-memory `SlackApi` used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ConnectorError;
use crate::gateway::{SearchEnvelope, SearchSort, SlackApi, ThreadEnvelope};

type ThreadCall = (String, String, Option<u32>, Option<String>);

enum Reply {
    Body(Value),
    Fail(fn() -> ConnectorError),
}

#[derive(Default)]
pub(crate) struct FakeSlack {
    channels: HashMap<String, String>,
    searches: HashMap<String, Reply>,
    thread: Option<Reply>,
    search_calls: Mutex<Vec<(String, Option<u32>, Option<String>)>>,
    lookups: Mutex<Vec<String>>,
    thread_calls: Mutex<Vec<ThreadCall>>,
}

impl FakeSlack {
    pub fn with_channel(mut self, id: &str, name: &str) -> Self {
        self.channels.insert(id.to_string(), name.to_string());
        self
    }

    pub fn with_search(mut self, query: &str, body: Value) -> Self {
        self.searches.insert(query.to_string(), Reply::Body(body));
        self
    }

    pub fn with_search_failure(mut self, query: &str, err: fn() -> ConnectorError) -> Self {
        self.searches.insert(query.to_string(), Reply::Fail(err));
        self
    }

    pub fn with_thread(mut self, body: Value) -> Self {
        self.thread = Some(Reply::Body(body));
        self
    }

    pub fn with_thread_failure(mut self, err: fn() -> ConnectorError) -> Self {
        self.thread = Some(Reply::Fail(err));
        self
    }

    pub fn search_queries(&self) -> Vec<String> {
        self.search_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(q, _, _)| q.clone())
            .collect()
    }

    pub fn search_counts(&self) -> Vec<Option<u32>> {
        self.search_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c, _)| *c)
            .collect()
    }

    pub fn search_teams(&self) -> Vec<Option<String>> {
        self.search_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    pub fn channel_lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn thread_calls(&self) -> Vec<ThreadCall> {
        self.thread_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SlackApi for FakeSlack {
    async fn search(
        &self,
        query: &str,
        count: Option<u32>,
        _sort: Option<SearchSort>,
        team_id: Option<&str>,
    ) -> Result<SearchEnvelope, ConnectorError> {
        self.search_calls.lock().unwrap().push((
            query.to_string(),
            count,
            team_id.map(str::to_string),
        ));
        match self.searches.get(query) {
            Some(Reply::Body(body)) => Ok(serde_json::from_value(body.clone())?),
            Some(Reply::Fail(err)) => Err(err()),
            None => Ok(serde_json::from_value(
                json!({"ok": true, "messages": {"matches": [], "total": 0}}),
            )?),
        }
    }

    async fn thread_page(
        &self,
        channel_id: &str,
        root_ts: &str,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<ThreadEnvelope, ConnectorError> {
        self.thread_calls.lock().unwrap().push((
            channel_id.to_string(),
            root_ts.to_string(),
            limit,
            cursor.map(str::to_string),
        ));
        match &self.thread {
            Some(Reply::Body(body)) => Ok(serde_json::from_value(body.clone())?),
            Some(Reply::Fail(err)) => Err(err()),
            None => Ok(serde_json::from_value(json!({"ok": true, "messages": []}))?),
        }
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String, ConnectorError> {
        self.lookups.lock().unwrap().push(channel_id.to_string());
        self.channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| ConnectorError::UpstreamBusiness {
                code: "channel_not_found".to_string(),
            })
    }
}
