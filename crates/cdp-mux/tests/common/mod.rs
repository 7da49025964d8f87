//! Scripted stand-in for a browser speaking the DevTools protocol.
//!
//! Only the handful of methods the tests exercise are understood. Events a
//! command causes are written before its response, so by the time a command
//! returns its events have been dispatched.

#![allow(dead_code)]

use cdp_mux::cdp::transport::{channel, RemoteEnd};
use cdp_mux::{CDPConnection, ConnectionConfig};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const SERVER_ERROR: i64 = -32000;

/// Connect to a fresh fake browser.
pub fn launch() -> Arc<CDPConnection> {
    let (sink, frames, remote) = channel();
    let connection = CDPConnection::new(sink, frames, ConnectionConfig::default());
    tokio::spawn(serve(remote));
    connection
}

/// Create a page target and return its id.
pub async fn new_page(connection: &CDPConnection) -> String {
    let result = connection
        .send("Target.createTarget", Some(json!({ "url": "about:blank" })))
        .await
        .expect("createTarget");
    result["targetId"].as_str().expect("targetId").to_string()
}

pub async fn close_page(connection: &CDPConnection, target_id: &str) {
    connection
        .send("Target.closeTarget", Some(json!({ "targetId": target_id })))
        .await
        .expect("closeTarget");
}

async fn serve(mut remote: RemoteEnd) {
    let mut browser = Browser::default();
    while let Some(text) = remote.outgoing.recv().await {
        let frame: Value = serde_json::from_str(&text).expect("connection writes JSON");
        for out in browser.handle(&frame) {
            if remote.incoming.send(out.to_string()).is_err() {
                return;
            }
        }
    }
}

#[derive(Default)]
struct Page {
    globals: HashMap<String, Value>,
}

struct Attached {
    target: Option<String>,
    domains: HashSet<String>,
}

#[derive(Default)]
struct Browser {
    next_target: u32,
    next_session: u32,
    next_request: u32,
    pages: HashMap<String, Page>,
    sessions: HashMap<String, Attached>,
}

type Reply = std::result::Result<Value, (i64, String)>;

impl Browser {
    fn handle(&mut self, frame: &Value) -> Vec<Value> {
        let id = frame["id"].clone();
        let method = frame["method"].as_str().unwrap_or_default().to_string();
        let params = frame.get("params").cloned().unwrap_or_else(|| json!({}));
        let session = frame.get("sessionId").and_then(Value::as_str).map(String::from);

        let mut events = Vec::new();
        let reply = match &session {
            Some(s) if !self.sessions.contains_key(s) => {
                Err((SERVER_ERROR, "Session with given id not found.".to_string()))
            }
            Some(s) => self.session_command(s, &method, &params, &mut events),
            None => self.browser_command(&method, &params, &mut events),
        };

        let mut response = match reply {
            Ok(result) => json!({ "id": id, "result": result }),
            Err((code, message)) => json!({ "id": id, "error": { "code": code, "message": message } }),
        };
        if let Some(s) = session {
            response["sessionId"] = json!(s);
        }

        // Detach notifications follow the response, as Chrome sends them.
        let (after, mut out): (Vec<Value>, Vec<Value>) = events
            .into_iter()
            .partition(|e| e["method"] == "Target.detachedFromTarget" && method == "Target.detachFromTarget");
        out.push(response);
        out.extend(after);
        out
    }

    fn browser_command(&mut self, method: &str, params: &Value, events: &mut Vec<Value>) -> Reply {
        match method {
            "Browser.getVersion" => Ok(json!({
                "protocolVersion": "1.3",
                "product": "HeadlessChrome/120.0.0.0",
                "userAgent": "Mozilla/5.0 HeadlessChrome/120.0.0.0",
            })),
            "Target.createTarget" => {
                self.next_target += 1;
                let target_id = format!("page-{}", self.next_target);
                self.pages.insert(target_id.clone(), Page::default());
                Ok(json!({ "targetId": target_id }))
            }
            "Target.attachToTarget" => {
                let target_id = params["targetId"].as_str().unwrap_or_default();
                if !self.pages.contains_key(target_id) {
                    return Err((INVALID_PARAMS, "No target with given id found".to_string()));
                }
                Ok(json!({ "sessionId": self.attach(Some(target_id.to_string())) }))
            }
            "Target.attachToBrowserTarget" => Ok(json!({ "sessionId": self.attach(None) })),
            "Target.detachFromTarget" => {
                let session_id = params["sessionId"].as_str().unwrap_or_default().to_string();
                match self.sessions.remove(&session_id) {
                    Some(attached) => {
                        events.push(detached_event(&session_id, attached.target.as_deref()));
                        Ok(json!({}))
                    }
                    None => Err((SERVER_ERROR, "No session with given id".to_string())),
                }
            }
            "Target.closeTarget" => {
                let target_id = params["targetId"].as_str().unwrap_or_default().to_string();
                if self.pages.remove(&target_id).is_none() {
                    return Err((INVALID_PARAMS, "No target with given id found".to_string()));
                }
                let gone: Vec<String> = self
                    .sessions
                    .iter()
                    .filter(|(_, a)| a.target.as_deref() == Some(target_id.as_str()))
                    .map(|(id, _)| id.clone())
                    .collect();
                for session_id in gone {
                    self.sessions.remove(&session_id);
                    events.push(detached_event(&session_id, Some(&target_id)));
                }
                events.push(json!({
                    "method": "Target.targetDestroyed",
                    "params": { "targetId": target_id },
                }));
                Ok(json!({ "success": true }))
            }
            other => Err(not_found(other)),
        }
    }

    fn session_command(
        &mut self,
        session_id: &str,
        method: &str,
        params: &Value,
        events: &mut Vec<Value>,
    ) -> Reply {
        let target = self.sessions[session_id].target.clone();

        if let Some(domain) = method.strip_suffix(".enable") {
            return self.toggle(session_id, domain, true, method);
        }
        if let Some(domain) = method.strip_suffix(".disable") {
            return self.toggle(session_id, domain, false, method);
        }

        match (method, target) {
            ("Browser.getVersion", _) => self.browser_command(method, params, events),
            ("Runtime.evaluate", Some(target)) => {
                let expression = params["expression"].as_str().unwrap_or_default();
                self.evaluate(&target, expression, events)
            }
            ("Page.navigate", Some(target)) => {
                self.next_request += 1;
                let url = params["url"].clone();
                for (id, attached) in &self.sessions {
                    if attached.target.as_deref() == Some(target.as_str())
                        && attached.domains.contains("Network")
                    {
                        events.push(json!({
                            "method": "Network.requestWillBeSent",
                            "sessionId": id,
                            "params": {
                                "requestId": self.next_request.to_string(),
                                "request": { "url": url, "method": "GET" },
                            },
                        }));
                    }
                }
                if let Some(page) = self.pages.get_mut(&target) {
                    page.globals.clear();
                }
                Ok(json!({ "frameId": target }))
            }
            (other, _) => Err(not_found(other)),
        }
    }

    fn toggle(&mut self, session_id: &str, domain: &str, enable: bool, method: &str) -> Reply {
        if !matches!(domain, "Runtime" | "Network" | "Debugger" | "Page") {
            return Err(not_found(method));
        }
        let attached = self.sessions.get_mut(session_id).expect("checked by caller");
        if enable {
            attached.domains.insert(domain.to_string());
        } else {
            attached.domains.remove(domain);
        }
        Ok(json!({}))
    }

    fn evaluate(&mut self, target: &str, expression: &str, events: &mut Vec<Value>) -> Reply {
        let expression = expression.trim();

        if let Some(url) = expression.strip_prefix("//# sourceURL=") {
            for (id, attached) in &self.sessions {
                if attached.target.as_deref() == Some(target) && attached.domains.contains("Debugger") {
                    events.push(json!({
                        "method": "Debugger.scriptParsed",
                        "sessionId": id,
                        "params": { "scriptId": "1", "url": url.trim() },
                    }));
                }
            }
            return Ok(json!({ "result": { "type": "undefined" } }));
        }

        let page = self.pages.get_mut(target).expect("session target exists");

        if let Some((lhs, rhs)) = expression.split_once('=') {
            if let Some(name) = lhs.trim().strip_prefix("window.") {
                let value: Value = serde_json::from_str(rhs.trim()).unwrap_or(Value::Null);
                page.globals.insert(name.to_string(), value.clone());
                return Ok(json!({ "result": { "type": "string", "value": value } }));
            }
        }

        if let Some(name) = expression.strip_prefix("window.") {
            return Ok(match page.globals.get(name) {
                Some(value) => json!({ "result": { "type": "string", "value": value } }),
                None => json!({ "result": { "type": "undefined" } }),
            });
        }

        if let Some((a, b)) = expression.split_once('+') {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
                return Ok(json!({ "result": { "type": "number", "value": a + b, "description": (a + b).to_string() } }));
            }
        }

        Ok(json!({
            "result": { "type": "undefined" },
            "exceptionDetails": { "text": format!("Cannot evaluate {}", expression) },
        }))
    }

    fn attach(&mut self, target: Option<String>) -> String {
        self.next_session += 1;
        let session_id = format!("SESSION-{:04}", self.next_session);
        self.sessions.insert(
            session_id.clone(),
            Attached {
                target,
                domains: HashSet::new(),
            },
        );
        session_id
    }
}

fn detached_event(session_id: &str, target_id: Option<&str>) -> Value {
    json!({
        "method": "Target.detachedFromTarget",
        "params": { "sessionId": session_id, "targetId": target_id },
    })
}

fn not_found(method: &str) -> (i64, String) {
    (METHOD_NOT_FOUND, format!("'{}' wasn't found", method))
}
