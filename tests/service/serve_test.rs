//! End-to-end JSON-line sessions against the fake assistant.

use std::time::Duration;

use aider_supervisor::service::{serve, AssistantService, Workflow};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use crate::support::FakeAssistant;

struct Client {
    input: DuplexStream,
    replies: Lines<BufReader<DuplexStream>>,
}

impl Client {
    async fn call(&mut self, request: Value) -> Value {
        let mut line = request.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.reply().await
    }

    async fn reply(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.replies.next_line())
            .await
            .expect("reply in time")
            .unwrap()
            .expect("reply line");
        serde_json::from_str(&line).unwrap()
    }
}

fn connect(service: AssistantService) -> (Client, tokio::task::JoinHandle<()>) {
    let (input, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, output) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        serve(service, server_in, server_out).await.unwrap();
    });
    let client = Client {
        input,
        replies: BufReader::new(output).lines(),
    };
    (client, server)
}

#[tokio::test]
async fn full_session_over_json_lines() {
    let fake = FakeAssistant::new();
    let service = AssistantService::new(fake.config(), None).unwrap();
    let (mut client, server) = connect(service);

    let reply = client
        .call(json!({"id": 1, "op": "start", "files": ["a.py"], "config": {"model": "m1"}}))
        .await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["ok"], json!(true), "{reply}");
    assert_eq!(reply["result"]["startup"]["ready"], json!(true));

    let reply = client.call(json!({"id": 2, "op": "send", "message": "hello"})).await;
    assert_eq!(reply["result"]["lines"], json!(["you said: hello"]));

    let reply = client.call(json!({"id": 3, "op": "list_files"})).await;
    assert_eq!(reply["result"], json!(["a.py"]));

    let reply = client.call(json!({"id": 4, "op": "get_status"})).await;
    assert_eq!(reply["result"]["state"], json!("ready"));
    assert_eq!(reply["result"]["breaker"], json!("closed"));

    let reply = client.call(json!({"id": 5, "op": "get_debug_info"})).await;
    assert_eq!(reply["result"]["spawn_attempts"], json!(1));
    assert!(reply["result"]["stdout_tail"].as_array().is_some());

    let reply = client.call(json!({"id": 6, "op": "stop"})).await;
    assert_eq!(reply["result"]["previous_state"], json!("ready"));

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn emergency_stop_is_not_blocked_by_send() {
    let fake = FakeAssistant::new();
    let service = AssistantService::new(fake.config(), None).unwrap();
    let (mut client, server) = connect(service);

    let reply = client.call(json!({"id": "start", "op": "start"})).await;
    assert_eq!(reply["ok"], json!(true), "{reply}");

    client
        .input
        .write_all(b"{\"id\":\"hang\",\"op\":\"send\",\"message\":\"hang\"}\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    client
        .input
        .write_all(b"{\"id\":\"kill\",\"op\":\"emergency_stop\"}\n")
        .await
        .unwrap();

    let first = client.reply().await;
    let second = client.reply().await;
    let (hang, kill) = if first["id"] == json!("hang") {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(kill["ok"], json!(true));
    assert_eq!(kill["result"]["forced"], json!(true));
    assert_eq!(hang["ok"], json!(false));
    assert_eq!(hang["error"]["kind"], json!("terminated"));

    drop(client);
    server.await.unwrap();
}

#[tokio::test]
async fn quick_start_applies_workflow() {
    let fake = FakeAssistant::new();
    let service = AssistantService::new(fake.config(), None).unwrap();

    let outcome = service
        .quick_start(Workflow::Refactor, vec!["lib.py".to_string()], Default::default())
        .await
        .unwrap();
    assert_eq!(outcome.workflow, Workflow::Refactor);

    let args = &outcome.start.startup.lines[0];
    assert!(args.contains("--architect"), "{args}");
    assert!(args.contains("--no-auto-commits"), "{args}");
    let initial = outcome.start.initial.unwrap();
    assert!(initial.lines[0].starts_with("you said: Help me refactor"));

    service.emergency_stop().await;
}

#[tokio::test]
async fn end_of_input_stops_session() {
    let fake = FakeAssistant::new();
    let service = AssistantService::new(fake.config(), None).unwrap();
    let supervisor = service.supervisor().clone();
    let (mut client, server) = connect(service);

    let reply = client.call(json!({"id": 1, "op": "start"})).await;
    assert_eq!(reply["ok"], json!(true), "{reply}");

    drop(client);
    server.await.unwrap();
    assert_eq!(
        supervisor.state().await,
        aider_supervisor::supervisor::SessionState::Stopped
    );
}
