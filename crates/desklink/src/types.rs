use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the runtime process snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub process_id: u64,
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub cpu_usage: Option<f64>,
    #[serde(default)]
    pub working_set_size: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogInfo {
    pub date: String,
    pub name: String,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInfo {
    pub device_scale_factor: f64,
    pub primary_monitor: Value,
    #[serde(default)]
    pub non_primary_monitors: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub uuid: String,
    pub main_window: Value,
    #[serde(default)]
    pub child_windows: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub uuid: String,
    pub is_running: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MousePosition {
    pub left: i64,
    pub top: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub manifest_url: String,
    pub port: u16,
    pub version: String,
    #[serde(default)]
    pub architecture: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RvmInfo {
    pub action: String,
    pub path: String,
    pub start_time: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Which caches `clear_cache` wipes.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheOptions {
    pub cache: bool,
    pub cookies: bool,
    pub local_storage: bool,
    pub appcache: bool,
    pub user_data: bool,
}

impl ClearCacheOptions {
    pub fn all() -> Self {
        Self {
            cache: true,
            cookies: true,
            local_storage: true,
            appcache: true,
            user_data: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProcessInfo {
    pub process_uuid: String,
}

/// Exit report of an external process. Terminate replies carry the code as `result`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProcessExit {
    pub process_uuid: String,
    #[serde(alias = "result")]
    pub exit_code: i64,
}
