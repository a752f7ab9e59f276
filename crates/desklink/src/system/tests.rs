use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::Duration;

use desklink_runtime::session::actions as session_actions;
use desklink_runtime::{
    encode_event, encode_response, memory_pair, MemoryAcceptor, MemoryConnector, MemoryPeer,
    ReconnectPolicy, ResponseFrame, Session, TransportConfig,
};

use super::*;

const TEST_UUID: &str = "3d1f7b0e-2c55-4f0a-9a61-7e4b5c2d9f01";
const RUNTIME_VERSION: &str = "8.56.30.37";

#[derive(Clone, Default)]
struct FakeDesktop {
    requests: Arc<StdMutex<Vec<(String, Value)>>>,
    log_lines: Arc<StdMutex<Vec<String>>>,
    exit_listeners: Arc<StdMutex<HashMap<String, String>>>,
    broken_shapes: Arc<AtomicBool>,
}

impl FakeDesktop {
    fn requests_for(&self, action: &str) -> Vec<Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn broken(&self) -> bool {
        self.broken_shapes.load(AtomicOrdering::SeqCst)
    }

    /// Reply data for one request. Events to push first go into `pushes`.
    fn handle(&self, action: &str, payload: &Value, pushes: &mut Vec<EventFrame>) -> Result<Value, String> {
        match action {
            session_actions::REQUEST_AUTHORIZATION => Ok(json!({ "granted": true })),
            session_actions::SUBSCRIBE_EVENT | session_actions::UNSUBSCRIBE_EVENT => Ok(Value::Null),
            actions::GET_MACHINE_ID if self.broken() => Ok(json!(42)),
            actions::GET_MACHINE_ID => Ok(json!("5b8e0c7a-machine")),
            actions::GET_VERSION => Ok(json!(RUNTIME_VERSION)),
            actions::PROCESS_SNAPSHOT if self.broken() => Ok(json!([{ "name": "Startup App" }])),
            actions::PROCESS_SNAPSHOT => Ok(json!([
                {"cpuUsage":0,"workingSetSize":27725824,"processId":10292,"name":"Notifications Service","type":"application","uuid":"service:notifications"},
                {"cpuUsage":0,"workingSetSize":1486848,"processId":9116,"name":"Startup App","type":"application","uuid":"startup"}
            ])),
            actions::GET_LOG_LIST if self.broken() => Ok(json!([{ "name": "debug.log", "size": 10 }])),
            actions::GET_LOG_LIST => Ok(json!([
                { "date": "2024-03-01T10:00:00.000Z", "name": "debug.log", "size": 2048 },
                { "date": "2024-02-29T09:30:00.000Z", "name": "debug-1.log", "size": 512 }
            ])),
            actions::WRITE_LOG => {
                let level = payload["level"].as_str().unwrap_or("info").to_uppercase();
                let text = payload["text"].as_str().unwrap_or_default();
                self.log_lines
                    .lock()
                    .expect("log lock")
                    .push(format!("[2024-03-01 10:00:00.000] {level} {text}"));
                Ok(Value::Null)
            }
            actions::GET_LOG if payload["name"] == "debug.log" => {
                Ok(json!(self.log_lines.lock().expect("log lock").join("\n")))
            }
            actions::GET_LOG => Err("log not found".to_owned()),
            actions::GET_MONITOR_INFO => Ok(json!({
                "deviceScaleFactor": 1.5,
                "primaryMonitor": { "name": "DISPLAY1", "monitorRect": { "left": 0, "top": 0, "right": 1920, "bottom": 1080 } },
                "nonPrimaryMonitors": []
            })),
            actions::GET_ALL_WINDOWS => Ok(json!([
                { "uuid": "demo-app", "mainWindow": { "name": "demo-app", "top": 10, "left": 10 }, "childWindows": [] }
            ])),
            actions::GET_ALL_APPLICATIONS => Ok(json!([{ "uuid": "demo-app", "isRunning": true }])),
            actions::GET_MOUSE_POSITION => Ok(json!({ "left": 100, "top": 200 })),
            actions::GET_CONFIG => match payload.get("section").and_then(Value::as_str) {
                None => Ok(json!({ "runtime": { "version": RUNTIME_VERSION }, "startup_app": null })),
                Some("runtime") => Ok(json!({ "version": RUNTIME_VERSION })),
                Some(_) => Ok(json!("not-an-object")),
            },
            actions::SHOW_DEVELOPER_TOOLS if payload["uuid"] == "demo-app" => Ok(Value::Null),
            actions::SHOW_DEVELOPER_TOOLS => Err("application not found".to_owned()),
            actions::LAUNCH_EXTERNAL_PROCESS => {
                let listener = payload["listener"].as_str().unwrap_or_default().to_owned();
                self.exit_listeners
                    .lock()
                    .expect("listeners lock")
                    .insert("proc-1".to_owned(), listener);
                Ok(json!({ "processUuid": "proc-1" }))
            }
            actions::TERMINATE_EXTERNAL_PROCESS => {
                let process_uuid = payload["uuid"].as_str().unwrap_or_default();
                let listener = self
                    .exit_listeners
                    .lock()
                    .expect("listeners lock")
                    .remove(process_uuid)
                    .ok_or_else(|| format!("no process {process_uuid}"))?;
                pushes.push(EventFrame::new(
                    topics::EXTERNAL_PROCESS_EXITED,
                    json!({ "processUuid": process_uuid, "exitCode": 1, "listener": listener }),
                ));
                Ok(json!({ "processUuid": process_uuid, "result": 1 }))
            }
            actions::GET_ENVIRONMENT_VARIABLE => {
                let mut values = serde_json::Map::new();
                for name in payload["environmentVariables"].as_array().into_iter().flatten() {
                    let Some(name) = name.as_str() else { continue };
                    match name {
                        "UNREPORTED" => {}
                        "USERNAME" => {
                            values.insert(name.to_owned(), json!("desk"));
                        }
                        _ => {
                            values.insert(name.to_owned(), Value::Null);
                        }
                    }
                }
                Ok(Value::Object(values))
            }
            actions::DELETE_CACHE_REQUEST | actions::CLEAR_CACHE => Ok(Value::Null),
            actions::GET_RUNTIME_INFO => Ok(json!({
                "manifestUrl": "http://localhost:5090/getManifest",
                "port": 9696,
                "version": RUNTIME_VERSION,
                "architecture": "x64"
            })),
            actions::GET_RVM_INFO => Ok(json!({
                "action": "get-rvm-info",
                "path": "C:\\Users\\desk\\AppData\\Local\\Runtime\\RVM.exe",
                "start-time": "2018-04-12 14:01:41",
                "version": "4.0.1.1",
                "working-dir": "C:\\Users\\desk\\AppData\\Local\\Runtime"
            })),
            other => Err(format!("unknown action {other}")),
        }
    }

    async fn serve(&self, mut peer: MemoryPeer) {
        while let Some(bytes) = peer.recv().await {
            let request: Value = serde_json::from_slice(&bytes).expect("request json");
            let action = request["action"].as_str().expect("action").to_owned();
            let message_id = request["messageId"].as_u64().expect("messageId");
            let payload = request["payload"].clone();
            self.requests
                .lock()
                .expect("requests lock")
                .push((action.clone(), payload.clone()));

            let mut pushes = Vec::new();
            let reply = match self.handle(&action, &payload, &mut pushes) {
                Ok(data) => ResponseFrame::success(message_id, data),
                Err(reason) => ResponseFrame::failure(message_id, reason),
            };
            for event in pushes {
                if peer.send(encode_event(&event)).await.is_err() {
                    return;
                }
            }
            if peer.send(encode_response(&reply)).await.is_err() {
                return;
            }
        }
    }
}

fn spawn_fake_desktop(mut acceptor: MemoryAcceptor) -> FakeDesktop {
    let fake = FakeDesktop::default();
    let server = fake.clone();
    tokio::spawn(async move {
        while let Some(peer) = acceptor.accept().await {
            server.serve(peer).await;
        }
    });
    fake
}

fn test_config() -> ConnectConfig {
    ConnectConfig::new()
        .with_uuid(TEST_UUID)
        .with_request_timeout(Duration::from_secs(1))
        .with_reconnect(ReconnectPolicy::Never)
}

async fn connect_fake() -> (DesktopRuntime, FakeDesktop) {
    let (connector, acceptor) = memory_pair(TransportConfig::default());
    let fake = spawn_fake_desktop(acceptor);
    let runtime = DesktopRuntime::connect_with(test_config(), connector)
        .await
        .expect("connect");
    (runtime, fake)
}

#[tokio::test(flavor = "current_thread")]
async fn machine_id_and_version_are_plain_strings() {
    let (runtime, _fake) = connect_fake().await;
    assert_eq!(runtime.identity(), TEST_UUID);
    assert_eq!(
        runtime.get_machine_id().await.expect("machine id"),
        "5b8e0c7a-machine"
    );
    assert_eq!(runtime.get_version().await.expect("version"), RUNTIME_VERSION);
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn process_and_log_lists_carry_required_fields() {
    let (runtime, _fake) = connect_fake().await;

    let processes = runtime.get_process_list().await.expect("process list");
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].process_id, 10292);
    assert_eq!(processes[0].name, "Notifications Service");
    assert_eq!(processes[1].uuid.as_deref(), Some("startup"));
    assert_eq!(processes[1].kind.as_deref(), Some("application"));

    let logs = runtime.get_log_list().await.expect("log list");
    assert_eq!(
        logs[0],
        LogInfo {
            date: "2024-03-01T10:00:00.000Z".to_owned(),
            name: "debug.log".to_owned(),
            size: 2048,
        }
    );
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_results_are_invalid_response() {
    let (runtime, fake) = connect_fake().await;
    fake.broken_shapes.store(true, AtomicOrdering::SeqCst);

    let err = runtime.get_log_list().await.expect_err("missing date");
    assert!(matches!(
        err,
        DeskError::InvalidResponse { ref action, .. } if action == actions::GET_LOG_LIST
    ));

    let err = runtime.get_process_list().await.expect_err("missing processId");
    assert!(matches!(err, DeskError::InvalidResponse { .. }));

    let err = runtime.get_machine_id().await.expect_err("number id");
    assert!(matches!(err, DeskError::InvalidResponse { .. }));
    assert!(runtime.session().is_open());
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn written_log_line_can_be_read_back() {
    let (runtime, fake) = connect_fake().await;
    let text = uuid::Uuid::new_v4().to_string();

    runtime.log(LogLevel::Info, &text).await.expect("write log");
    assert_eq!(
        fake.requests_for(actions::WRITE_LOG),
        vec![json!({ "level": "info", "text": text })]
    );

    let log = runtime.get_log("debug.log").await.expect("read log");
    assert!(log.contains(&text));
    assert!(log.contains("INFO"));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn get_log_validates_and_surfaces_remote_errors() {
    let (runtime, fake) = connect_fake().await;

    let err = runtime.get_log("  ").await.expect_err("empty name");
    assert!(matches!(err, DeskError::InvalidArgument(_)));
    assert!(fake.requests_for(actions::GET_LOG).is_empty());

    let err = runtime.get_log("missing.log").await.expect_err("unknown log");
    assert_eq!(
        err,
        DeskError::Call(CallError::Remote("log not found".to_owned()))
    );
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn desktop_geometry_queries_decode() {
    let (runtime, _fake) = connect_fake().await;

    let monitor = runtime.get_monitor_info().await.expect("monitor info");
    assert_eq!(monitor.device_scale_factor, 1.5);
    assert_eq!(monitor.primary_monitor["name"], "DISPLAY1");
    assert!(monitor.non_primary_monitors.is_empty());

    let windows = runtime.get_all_windows().await.expect("windows");
    assert_eq!(windows[0].uuid, "demo-app");
    assert_eq!(windows[0].main_window["name"], "demo-app");

    let apps = runtime.get_all_applications().await.expect("applications");
    assert_eq!(
        apps,
        vec![ApplicationInfo {
            uuid: "demo-app".to_owned(),
            is_running: true,
        }]
    );

    let position = runtime.get_mouse_position().await.expect("mouse");
    assert_eq!(position, MousePosition { left: 100, top: 200 });
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn config_is_always_an_object() {
    let (runtime, fake) = connect_fake().await;

    let whole = runtime.get_config(None).await.expect("whole config");
    assert_eq!(whole["runtime"]["version"], RUNTIME_VERSION);

    let section = runtime
        .get_config(Some("runtime"))
        .await
        .expect("runtime section");
    assert_eq!(section, json!({ "version": RUNTIME_VERSION }));
    assert_eq!(
        fake.requests_for(actions::GET_CONFIG),
        vec![json!({}), json!({ "section": "runtime" })]
    );

    let err = runtime
        .get_config(Some("odd"))
        .await
        .expect_err("non-object");
    assert!(matches!(err, DeskError::InvalidResponse { .. }));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn developer_tools_target_a_window() {
    let (runtime, fake) = connect_fake().await;

    runtime
        .show_developer_tools("demo-app", "demo-app")
        .await
        .expect("devtools");
    assert_eq!(
        fake.requests_for(actions::SHOW_DEVELOPER_TOOLS),
        vec![json!({ "uuid": "demo-app", "name": "demo-app" })]
    );

    let err = runtime
        .show_developer_tools("ghost", "ghost")
        .await
        .expect_err("unknown app");
    assert_eq!(
        err,
        DeskError::Call(CallError::Remote("application not found".to_owned()))
    );

    let err = runtime
        .show_developer_tools("", "main")
        .await
        .expect_err("empty uuid");
    assert!(matches!(err, DeskError::InvalidArgument(_)));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn system_event_listeners_attach_and_detach() {
    let (runtime, fake) = connect_fake().await;
    let listener: Arc<dyn EventListener> =
        Arc::new(|_: &EventFrame| -> Result<(), ListenerError> { Ok(()) });
    let event_topics = [
        topics::DESKTOP_ICON_CLICKED,
        topics::IDLE_STATE_CHANGED,
        topics::MONITOR_INFO_CHANGED,
        topics::SESSION_CHANGED,
    ];

    for topic in event_topics {
        runtime
            .add_event_listener(topic, Arc::clone(&listener))
            .await
            .expect("add listener");
    }
    let attached: Vec<Value> = event_topics
        .iter()
        .map(|topic| json!({ "topic": topic }))
        .collect();
    assert_eq!(fake.requests_for(session_actions::SUBSCRIBE_EVENT), attached);

    for topic in event_topics {
        let removed = runtime
            .remove_event_listener(topic, &listener)
            .await
            .expect("remove listener");
        assert_eq!(removed, 1);
    }
    assert_eq!(
        fake.requests_for(session_actions::UNSUBSCRIBE_EVENT),
        attached
    );
    assert!(runtime.session().subscribed_topics().is_empty());

    let err = runtime
        .add_event_listener("", listener)
        .await
        .expect_err("empty topic");
    assert!(matches!(err, DeskError::InvalidArgument(_)));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn launched_process_reports_exit_after_terminate() {
    let (runtime, fake) = connect_fake().await;

    let launched = runtime
        .launch_external_process("notepad.exe", "")
        .await
        .expect("launch");
    assert_eq!(launched.process_uuid(), "proc-1");
    let launch_payloads = fake.requests_for(actions::LAUNCH_EXTERNAL_PROCESS);
    let launch_payload = &launch_payloads[0];
    assert_eq!(launch_payload["path"], "notepad.exe");
    assert!(uuid::Uuid::parse_str(launch_payload["listener"].as_str().expect("listener")).is_ok());

    let terminated = runtime
        .terminate_external_process("proc-1", Duration::from_millis(2000), false)
        .await
        .expect("terminate");
    assert_eq!(
        terminated,
        ExternalProcessExit {
            process_uuid: "proc-1".to_owned(),
            exit_code: 1,
        }
    );
    assert_eq!(
        fake.requests_for(actions::TERMINATE_EXTERNAL_PROCESS),
        vec![json!({ "uuid": "proc-1", "timeout": 2000, "child": false })]
    );

    let exit = runtime
        .wait_external_process_exit(launched, Duration::from_secs(1))
        .await
        .expect("exit event");
    assert_eq!(exit.process_uuid, "proc-1");
    assert_eq!(exit.exit_code, 1);
    assert_eq!(
        runtime
            .session()
            .listener_count(topics::EXTERNAL_PROCESS_EXITED),
        0
    );
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn exit_wait_times_out_and_releases_listener() {
    let (runtime, _fake) = connect_fake().await;
    let launched = runtime
        .launch_external_process("notepad.exe", "--quiet")
        .await
        .expect("launch");

    let err = runtime
        .wait_external_process_exit(launched, Duration::from_millis(30))
        .await
        .expect_err("no exit yet");
    assert_eq!(err, DeskError::Call(CallError::Timeout));
    assert_eq!(
        runtime
            .session()
            .listener_count(topics::EXTERNAL_PROCESS_EXITED),
        0
    );
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn environment_lookup_reports_every_requested_name() {
    let (runtime, _fake) = connect_fake().await;

    let values = runtime
        .get_environment_variables(&["LOCALAPPDATA", "USERNAME"])
        .await
        .expect("env");
    assert_eq!(values.len(), 2);
    assert_eq!(values["USERNAME"].as_deref(), Some("desk"));
    assert_eq!(values["LOCALAPPDATA"], None);

    let err = runtime
        .get_environment_variables(&["USERNAME", "UNREPORTED"])
        .await
        .expect_err("missing name");
    assert_eq!(
        err,
        DeskError::InvalidResponse {
            action: actions::GET_ENVIRONMENT_VARIABLE.to_owned(),
            message: "missing environment variable UNREPORTED".to_owned(),
        }
    );

    let err = runtime
        .get_environment_variables(&[])
        .await
        .expect_err("no names");
    assert!(matches!(err, DeskError::InvalidArgument(_)));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn cache_requests_send_flags() {
    let (runtime, fake) = connect_fake().await;

    runtime
        .delete_cache_on_restart()
        .await
        .expect("delete cache on restart");
    runtime
        .clear_cache(ClearCacheOptions::all())
        .await
        .expect("clear cache");
    assert_eq!(
        fake.requests_for(actions::CLEAR_CACHE),
        vec![json!({
            "cache": true,
            "cookies": true,
            "localStorage": true,
            "appcache": true,
            "userData": true
        })]
    );
    assert_eq!(fake.requests_for(actions::DELETE_CACHE_REQUEST).len(), 1);
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn runtime_and_rvm_info_decode() {
    let (runtime, _fake) = connect_fake().await;

    let info = runtime.get_runtime_info().await.expect("runtime info");
    assert_eq!(info.manifest_url, "http://localhost:5090/getManifest");
    assert_eq!(info.port, 9696);
    assert_eq!(info.version, RUNTIME_VERSION);
    assert_eq!(info.architecture.as_deref(), Some("x64"));

    let rvm = runtime.get_rvm_info().await.expect("rvm info");
    assert_eq!(rvm.action, "get-rvm-info");
    assert_eq!(rvm.start_time, "2018-04-12 14:01:41");
    assert_eq!(rvm.version.as_deref(), Some("4.0.1.1"));
    runtime.close().await.expect("close");
}

#[tokio::test(flavor = "current_thread")]
async fn reconnected_client_sees_same_runtime_version() {
    let (connector, acceptor) = memory_pair(TransportConfig::default());
    let fake = spawn_fake_desktop(acceptor);
    let connector: Arc<MemoryConnector> = Arc::new(connector);

    let first = Session::with_shared_connector(
        test_config().session_config(),
        Arc::clone(&connector) as Arc<dyn Connector>,
    )
    .expect("session");
    first.open().await.expect("open first");
    let first = DesktopRuntime::from_session(first);
    let version_before = first.get_version().await.expect("version");
    first.close().await.expect("close first");

    let second = Session::with_shared_connector(test_config().session_config(), connector)
        .expect("session");
    second.open().await.expect("open second");
    let second = DesktopRuntime::from_session(second);
    assert_eq!(second.get_version().await.expect("version"), version_before);

    let authorizations = fake.requests_for(session_actions::REQUEST_AUTHORIZATION);
    assert_eq!(authorizations.len(), 2);
    assert!(authorizations
        .iter()
        .all(|payload| payload["uuid"] == TEST_UUID));
    second.close().await.expect("close second");
}
