//! Integration tests for the WebSocket transport.
//!
//! Drives a real server over a loopback socket: context lifecycle, render
//! round trips, collaborator notifications, and session cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rhizome_plinth_core::PluginDescriptor;
use rhizome_plinth_runtime::PlinthRuntime;
use rhizome_plinth_transport_websocket_jsonrpc::{Server, ServerConfig};

const CRAFT: &str = r#"
local ds = require("downstream")

function update(state, block)
  return {
    components = {
      {
        id = "smelter",
        type = "building",
        content = {
          {
            id = "default",
            html = "<p>" .. state.label .. " @ " .. block .. "</p>",
            submit = function(values) ds.log("amount", values.amount) end,
            buttons = {
              { text = "Craft", action = function() ds.dispatch({ name = "CRAFT" }) end },
            },
          },
        },
      },
    },
  }
end
"#;

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: i64,
    notifications: Vec<Value>,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        Self {
            ws,
            next_id: 1,
            notifications: Vec::new(),
        }
    }

    async fn send(&mut self, message: Value) {
        self.ws
            .send(Message::Text(message.to_string().into()))
            .await
            .unwrap();
    }

    async fn receive(&mut self) -> Value {
        loop {
            let msg = timeout(Duration::from_secs(5), self.ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Send a request and wait for its response, keeping any notifications
    /// that arrive in between.
    async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id }))
            .await;

        loop {
            let message = self.receive().await;
            if message.get("id") == Some(&json!(id)) {
                return message;
            }
            self.notifications.push(message);
        }
    }

    async fn result(&mut self, method: &str, params: Value) -> Value {
        let response = self.call(method, params).await;
        assert!(response.get("error").is_none(), "{method} failed: {response}");
        response["result"].clone()
    }

    async fn error_kind(&mut self, method: &str, params: Value) -> String {
        let response = self.call(method, params).await;
        assert_eq!(response["error"]["code"], json!(-32000), "{response}");
        response["error"]["data"]["kind"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

async fn start_server() -> (std::net::SocketAddr, Arc<Server>) {
    let runtime = PlinthRuntime::start().unwrap();
    let server = Arc::new(
        Server::new(runtime, ServerConfig::default())
            .with_plugins([PluginDescriptor::new("smelter", CRAFT)]),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (addr, server)
}

#[tokio::test]
async fn test_render_and_click_round_trip() {
    let (addr, _server) = start_server().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.result("ping", json!(null)).await, json!("pong"));

    client
        .send(json!({ "jsonrpc": "2.0", "method": "setState", "params": { "state": { "label": "idle" }, "block": 12 } }))
        .await;

    let created = client
        .result("newContext", json!({ "id": "smelter", "source": CRAFT }))
        .await;
    let context = created["contextId"].clone();
    assert!(context.is_u64());

    let response = client.result("update", json!({ "contextId": context })).await;
    let block = &response["components"][0]["content"][0];
    assert_eq!(response["version"], json!(1));
    assert_eq!(block["html"], json!("<p>idle @ 12</p>"));
    assert_eq!(block["submit"], json!("smelter/default/submit"));
    assert_eq!(block["buttons"][0]["action"], json!("smelter/default/0"));

    client
        .result(
            "submit",
            json!({ "contextId": context, "ref": "smelter/default/0" }),
        )
        .await;
    client
        .result(
            "submit",
            json!({ "contextId": context, "ref": "smelter/default/submit", "values": { "amount": "4" } }),
        )
        .await;

    assert_eq!(
        client.notifications,
        vec![
            json!({ "jsonrpc": "2.0", "method": "dispatch", "params": { "contextId": context, "args": [{ "name": "CRAFT" }] } }),
            json!({ "jsonrpc": "2.0", "method": "log", "params": { "contextId": context, "args": ["amount", "4"] } }),
        ]
    );
}

#[tokio::test]
async fn test_errors_carry_kinds() {
    let (addr, _server) = start_server().await;
    let mut client = Client::connect(addr).await;

    let created = client.result("newContext", json!({ "plugin": "smelter" })).await;
    let context = created["contextId"].clone();

    assert_eq!(client.error_kind("update", json!({ "contextId": context })).await, "not_ready");
    assert_eq!(
        client.error_kind("update", json!({ "contextId": 9999 })).await,
        "unknown_context"
    );
    assert_eq!(
        client
            .error_kind("newContext", json!({ "id": "bad", "source": "function update( end" }))
            .await,
        "load"
    );
    assert_eq!(client.error_kind("newContext", json!({ "plugin": "nope" })).await, "unknown_plugin");
    assert_eq!(client.error_kind("update", json!({})).await, "invalid_params");
    assert_eq!(client.error_kind("teleport", json!({})).await, "unknown_method");
}

#[tokio::test]
async fn test_context_lifecycle_over_the_wire() {
    let (addr, _server) = start_server().await;
    let mut client = Client::connect(addr).await;

    let created = client.result("newContext", json!({ "plugin": "smelter" })).await;
    let context = created["contextId"].clone();

    assert_eq!(client.result("hasContext", json!({ "contextId": context })).await, json!(true));
    client.result("deleteContext", json!({ "contextId": context })).await;
    client.result("deleteContext", json!({ "contextId": context })).await;
    assert_eq!(client.result("hasContext", json!({ "contextId": context })).await, json!(false));
}

#[tokio::test]
async fn test_sessions_only_see_their_own_contexts() {
    let (addr, server) = start_server().await;
    let mut owner = Client::connect(addr).await;
    let mut other = Client::connect(addr).await;

    let created = owner.result("newContext", json!({ "plugin": "smelter" })).await;
    let context = created["contextId"].clone();
    let id = serde_json::from_value(context.clone()).unwrap();

    assert_eq!(other.result("hasContext", json!({ "contextId": context })).await, json!(false));
    assert_eq!(
        other.error_kind("update", json!({ "contextId": context })).await,
        "unknown_context"
    );

    owner.ws.close(None).await.unwrap();
    drop(owner);

    let runtime = server.runtime().clone();
    let deleted = timeout(Duration::from_secs(5), async {
        while runtime.has_context(id).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(deleted.is_ok(), "context outlived its session");
    assert_eq!(server.session_count().await, 1);
}

#[tokio::test]
async fn test_notifications_get_no_reply() {
    let (addr, _server) = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send(json!({ "jsonrpc": "2.0", "method": "ping" })).await;
    client
        .send(json!({ "jsonrpc": "2.0", "method": "update", "params": { "contextId": 404 } }))
        .await;
    client.send(json!({ "jsonrpc": "2.0", "method": "frobnicate" })).await;
    client.send(json!({ "jsonrpc": "2.0", "params": {} })).await;

    client
        .send(json!({ "jsonrpc": "2.0", "method": "ping", "id": "after" }))
        .await;
    let reply = client.receive().await;
    assert_eq!(reply["id"], json!("after"), "{reply}");
    assert_eq!(reply["result"], json!("pong"));
}
