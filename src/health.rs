// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/health.rs - 服务健康状态
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;

use crate::model::{ModelLoader, ModelState};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
  Healthy,
  Unknown,
  Degraded,
  Unhealthy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComponentHealth {
  pub status: ComponentStatus,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
  pub status: &'static str,
  pub timestamp: String,
  pub version: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetailedHealth {
  pub status: &'static str,
  pub timestamp: String,
  pub version: &'static str,
  pub uptime_seconds: f64,
  pub components: BTreeMap<&'static str, ComponentHealth>,
}

fn timestamp(now: DateTime<Utc>) -> String {
  now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 由模型加载器推导的健康状态，没有单独的就绪标志
pub struct ServiceHealth {
  loader: Arc<ModelLoader>,
  started: Instant,
}

impl ServiceHealth {
  pub fn new(loader: Arc<ModelLoader>) -> Self {
    Self {
      loader,
      started: Instant::now(),
    }
  }

  pub fn uptime_seconds(&self) -> f64 {
    self.started.elapsed().as_secs_f64()
  }

  /// 有可用模型即就绪，热更新期间旧模型仍在服务
  pub fn is_ready(&self) -> bool {
    self.loader.is_loaded()
  }

  fn report(&self, status: &'static str) -> HealthReport {
    HealthReport {
      status,
      timestamp: timestamp(Utc::now()),
      version: SERVICE_VERSION,
    }
  }

  pub fn ok(&self) -> HealthReport {
    self.report("ok")
  }

  pub fn liveness(&self) -> HealthReport {
    self.report("alive")
  }

  pub fn readiness(&self) -> (bool, HealthReport) {
    let ready = self.is_ready();
    (ready, self.report(if ready { "ready" } else { "not_ready" }))
  }

  pub fn detailed(&self) -> DetailedHealth {
    let mut components = BTreeMap::new();
    components.insert(
      "api",
      ComponentHealth {
        status: ComponentStatus::Healthy,
        message: "API is operational".to_string(),
        details: None,
      },
    );
    components.insert("model", self.model_component());
    components.insert("engine", self.engine_component());

    let status = if !self.is_ready() {
      "not_ready"
    } else if components
      .values()
      .any(|c| !matches!(c.status, ComponentStatus::Healthy | ComponentStatus::Unknown))
    {
      "degraded"
    } else {
      "healthy"
    };

    DetailedHealth {
      status,
      timestamp: timestamp(Utc::now()),
      version: SERVICE_VERSION,
      uptime_seconds: self.uptime_seconds(),
      components,
    }
  }

  fn model_component(&self) -> ComponentHealth {
    let state = self.loader.state();
    let last_failure = self.loader.last_failure();

    match self.loader.current_info() {
      Some(info) => {
        let details = Some(json!({
          "name": info.name,
          "version": info.version,
          "format": info.format,
          "state": state,
          "checksum": info.checksum,
          "loaded_at": info.loaded_at,
          "monitoring": self.loader.is_monitoring(),
          "last_failure": last_failure,
        }));
        match last_failure {
          Some(failure) => ComponentHealth {
            status: ComponentStatus::Degraded,
            message: format!("Serving {} {}, last reload failed: {}", info.name, info.version, failure),
            details,
          },
          None => ComponentHealth {
            status: ComponentStatus::Healthy,
            message: format!("Model {} {} is {}", info.name, info.version, state),
            details,
          },
        }
      }
      None => match state {
        ModelState::Failed => ComponentHealth {
          status: ComponentStatus::Unhealthy,
          message: format!(
            "Model failed to load: {}",
            last_failure.unwrap_or_default()
          ),
          details: None,
        },
        _ => ComponentHealth {
          status: ComponentStatus::Unknown,
          message: format!("Model not loaded yet ({})", state),
          details: None,
        },
      },
    }
  }

  fn engine_component(&self) -> ComponentHealth {
    let runtime = self.loader.runtime();
    ComponentHealth {
      status: ComponentStatus::Healthy,
      message: format!("{} on {}", runtime.backend_name(), runtime.device()),
      details: Some(json!({
        "backend": runtime.backend_name(),
        "selected_device": runtime.device(),
        "devices": runtime.available_devices(),
      })),
    }
  }
}
