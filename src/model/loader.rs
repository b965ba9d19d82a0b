// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/model/loader.rs - 模型加载、版本发现与热更新
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

use std::{
  fs, io,
  panic::{AssertUnwindSafe, catch_unwind},
  path::{Path, PathBuf},
  sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
  time::{Duration, SystemTime},
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{
  LATEST_VERSION, LoadedModel, ModelError, ModelFormat, ModelInfo, ModelState, ModelVersion,
  checksum::model_checksum, watcher::Watcher,
};
use crate::runtime::{EngineError, ModelDefinition, Runtime};

const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// 模型切换后的通知
///
/// 只有在已有模型被替换时才会触发，首次加载不触发。
pub trait ReloadObserver: Send + Sync {
  fn on_model_reloaded(&self, info: &ModelInfo) -> anyhow::Result<()>;
}

impl<F> ReloadObserver for F
where
  F: Fn(&ModelInfo) -> anyhow::Result<()> + Send + Sync,
{
  fn on_model_reloaded(&self, info: &ModelInfo) -> anyhow::Result<()> {
    self(info)
  }
}

struct Bookkeeping {
  state: ModelState,
  /// 当前模型加载时计算的校验和
  observed_checksum: Option<String>,
  loads_in_flight: usize,
  last_failure: Option<String>,
  monitor: Option<Watcher>,
}

/// 模型目录中的一个候选文件
struct Candidate {
  version: String,
  format: ModelFormat,
  path: PathBuf,
  modified: SystemTime,
}

impl Candidate {
  fn weights_path(&self) -> Option<PathBuf> {
    self
      .format
      .weights_extension()
      .map(|ext| self.path.with_extension(ext))
  }
}

/// 模型加载器
///
/// 当前模型通过 `ArcSwapOption` 发布，推理调用每次取一份快照，
/// 热更新期间旧模型继续服务，直到最后一个引用释放。
pub struct ModelLoader {
  model_dir: PathBuf,
  runtime: Runtime,
  current: ArcSwapOption<LoadedModel>,
  bookkeeping: Mutex<Bookkeeping>,
  observers: RwLock<Vec<Arc<dyn ReloadObserver>>>,
}

impl ModelLoader {
  pub fn new(model_dir: impl Into<PathBuf>, runtime: Runtime) -> Self {
    Self {
      model_dir: model_dir.into(),
      runtime,
      current: ArcSwapOption::empty(),
      bookkeeping: Mutex::new(Bookkeeping {
        state: ModelState::Unloaded,
        observed_checksum: None,
        loads_in_flight: 0,
        last_failure: None,
        monitor: None,
      }),
      observers: RwLock::new(Vec::new()),
    }
  }

  pub fn model_dir(&self) -> &Path {
    &self.model_dir
  }

  pub fn runtime(&self) -> &Runtime {
    &self.runtime
  }

  fn book(&self) -> MutexGuard<'_, Bookkeeping> {
    self.bookkeeping.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 当前模型快照
  pub fn current(&self) -> Option<Arc<LoadedModel>> {
    self.current.load_full()
  }

  pub fn current_info(&self) -> Option<Arc<ModelInfo>> {
    self.current.load().as_ref().map(|m| m.info.clone())
  }

  pub fn is_loaded(&self) -> bool {
    self.current.load().is_some()
  }

  pub fn state(&self) -> ModelState {
    self.book().state
  }

  /// 最近一次失败的加载，成功加载后清空
  pub fn last_failure(&self) -> Option<String> {
    self.book().last_failure.clone()
  }

  pub fn is_monitoring(&self) -> bool {
    self.book().monitor.is_some()
  }

  pub fn subscribe(&self, observer: impl ReloadObserver + 'static) {
    self
      .observers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Arc::new(observer));
  }

  /// 加载模型
  ///
  /// 指定版本时加载 `{name}_{version}.{ext}`（`latest` 对应 `{name}.{ext}`），
  /// 否则选择修改时间最新的候选文件。编译在锁外完成，成功后原子替换当前模型。
  pub fn load(
    &self,
    name: &str,
    format: ModelFormat,
    version: Option<&str>,
  ) -> Result<Arc<ModelInfo>, ModelError> {
    {
      let mut book = self.book();
      book.loads_in_flight += 1;
      book.state = if self.is_loaded() {
        ModelState::Reloading
      } else {
        ModelState::Loading
      };
    }

    info!(
      "加载模型: {} ({}), 版本 {}",
      name,
      format,
      version.unwrap_or("<最新>")
    );

    // 后端 panic 视为编译失败，保证计数与状态得到结算
    let prepared = catch_unwind(AssertUnwindSafe(|| self.prepare(name, format, version)))
      .unwrap_or_else(|panic| {
        let reason = panic
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "未知原因".to_string());
        Err(ModelError::Compile(EngineError::Compile(format!(
          "编译过程发生 panic: {}",
          reason
        ))))
      });

    match prepared {
      Ok(loaded) => {
        let info = loaded.info.clone();
        let previous = {
          let mut book = self.book();
          let previous = self.current.swap(Some(Arc::new(loaded)));
          book.loads_in_flight -= 1;
          book.observed_checksum = info.checksum.clone();
          book.last_failure = None;
          book.state = if book.loads_in_flight > 0 {
            ModelState::Reloading
          } else {
            ModelState::Active
          };
          previous
        };

        info!(
          "模型加载成功: {} 版本 {}, 设备 {}, 输入 {:?}, 输出 {:?}",
          info.name,
          info.version,
          self.runtime.device(),
          info.input_shape,
          info.output_shape
        );

        if let Some(previous) = previous {
          debug!("替换旧模型: {} 版本 {}", previous.info.name, previous.info.version);
          self.notify(&info);
        }

        Ok(info)
      }
      Err(err) => {
        let mut book = self.book();
        book.loads_in_flight -= 1;
        book.last_failure = Some(err.to_string());
        if book.loads_in_flight == 0 {
          book.state = if self.is_loaded() {
            ModelState::Active
          } else {
            ModelState::Failed
          };
        }
        error!("模型加载失败: {}, 状态 {}", err, book.state);
        Err(err)
      }
    }
  }

  /// 按当前模型的名称、格式和版本重新加载
  pub fn reload(&self) -> Result<Arc<ModelInfo>, ModelError> {
    let info = self.current_info().ok_or(ModelError::NoModelLoaded)?;
    self.load(&info.name, info.format, Some(&info.version))
  }

  /// 比较当前模型文件的校验和，发生变化时重新加载，返回是否重新加载
  pub fn check_for_changes(&self) -> Result<bool, ModelError> {
    let Some(info) = self.current_info() else {
      return Ok(false);
    };

    let checksum = model_checksum(&info.path, info.weights_path.as_deref())?;
    let observed = self.book().observed_checksum.clone();
    if observed.as_deref() == Some(checksum.as_str()) {
      return Ok(false);
    }

    info!("模型文件已变化, 重新加载: {} 版本 {}", info.name, info.version);
    self.reload()?;
    Ok(true)
  }

  /// 启动后台热更新监控，已启动或尚未加载模型时仅记录警告
  pub fn start_hot_reload_monitoring(self: &Arc<Self>, interval: Duration) {
    let mut book = self.book();
    if book.monitor.is_some() {
      warn!("热更新监控已经启动");
      return;
    }
    let Some(info) = self.current_info() else {
      warn!("尚未加载模型, 无法启动热更新监控");
      return;
    };

    match Watcher::spawn(Arc::downgrade(self), interval) {
      Ok(watcher) => {
        book.monitor = Some(watcher);
        info!("热更新监控已启动: {}, 间隔 {:?}", info.name, interval);
      }
      Err(e) => error!("无法启动热更新监控线程: {}", e),
    }
  }

  /// 停止热更新监控，最多等待 2 秒
  pub fn stop_hot_reload_monitoring(&self) {
    let watcher = self.book().monitor.take();
    if let Some(watcher) = watcher {
      watcher.stop(MONITOR_STOP_TIMEOUT);
      info!("热更新监控已停止");
    }
  }

  /// 列出模型的所有版本（两种格式），按修改时间从新到旧
  pub fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>, ModelError> {
    validate_component("模型名称", name)?;

    let mut candidates = Vec::new();
    for format in ModelFormat::ALL {
      candidates.extend(self.scan(name, format)?);
    }
    sort_newest_first(&mut candidates);

    let mut versions = Vec::with_capacity(candidates.len());
    for candidate in candidates {
      let weights = candidate.weights_path().filter(|p| p.is_file());
      let checksum = model_checksum(&candidate.path, weights.as_deref())?;
      versions.push(ModelVersion {
        version: candidate.version,
        format: candidate.format,
        path: candidate.path,
        checksum,
        created_at: DateTime::<Utc>::from(candidate.modified),
      });
    }

    Ok(versions)
  }

  fn prepare(
    &self,
    name: &str,
    format: ModelFormat,
    version: Option<&str>,
  ) -> Result<LoadedModel, ModelError> {
    let candidate = self.resolve(name, format, version)?;

    let weights_path = match candidate.weights_path() {
      Some(weights) if weights.is_file() => Some(weights),
      Some(weights) => {
        return Err(ModelError::NotFound(format!(
          "缺少权重文件 {}",
          weights.display()
        )));
      }
      None => None,
    };

    let checksum = model_checksum(&candidate.path, weights_path.as_deref())?;
    debug!("模型校验和: {}", checksum);

    let definition = ModelDefinition {
      format,
      primary: candidate.path.clone(),
      weights: weights_path.clone(),
    };
    let compiled = self.runtime.compile(&definition)?;

    let info = ModelInfo {
      name: name.to_string(),
      version: candidate.version,
      format,
      path: candidate.path,
      weights_path,
      checksum: Some(checksum),
      loaded_at: Some(Utc::now()),
      input_shape: compiled.input_shape().to_vec(),
      output_shape: compiled.output_shape().to_vec(),
    };

    Ok(LoadedModel {
      info: Arc::new(info),
      compiled,
    })
  }

  fn resolve(
    &self,
    name: &str,
    format: ModelFormat,
    version: Option<&str>,
  ) -> Result<Candidate, ModelError> {
    validate_component("模型名称", name)?;

    match version {
      Some(version) => {
        validate_component("模型版本", version)?;
        let file_name = if version == LATEST_VERSION {
          format!("{}.{}", name, format.extension())
        } else {
          format!("{}_{}.{}", name, version, format.extension())
        };
        let path = self.model_dir.join(file_name);
        let metadata = fs::metadata(&path)
          .map_err(|_| ModelError::NotFound(path.display().to_string()))?;
        if !metadata.is_file() {
          return Err(ModelError::NotFound(path.display().to_string()));
        }
        Ok(Candidate {
          version: version.to_string(),
          format,
          path,
          modified: metadata.modified()?,
        })
      }
      None => {
        let mut candidates = self.scan(name, format)?;
        sort_newest_first(&mut candidates);
        candidates.into_iter().next().ok_or_else(|| {
          ModelError::NotFound(format!(
            "目录 {} 中没有模型 {} 的 {} 文件",
            self.model_dir.display(),
            name,
            format
          ))
        })
      }
    }
  }

  /// `{name}_*.{ext}` 与 `{name}.{ext}`
  fn scan(&self, name: &str, format: ModelFormat) -> Result<Vec<Candidate>, ModelError> {
    let entries = match fs::read_dir(&self.model_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ModelError::NotFound(format!(
          "模型目录不存在: {}",
          self.model_dir.display()
        )));
      }
      Err(e) => return Err(e.into()),
    };

    let suffix = format!(".{}", format.extension());
    let bare = format!("{}{}", name, suffix);
    let prefix = format!("{}_", name);

    let mut candidates = Vec::new();
    for entry in entries {
      let entry = entry?;
      let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
        continue;
      };

      let version = if file_name == bare {
        LATEST_VERSION.to_string()
      } else if let Some(version) = file_name
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix(&suffix))
        .filter(|v| !v.is_empty())
      {
        version.to_string()
      } else {
        continue;
      };

      let metadata = entry.metadata()?;
      if !metadata.is_file() {
        continue;
      }

      candidates.push(Candidate {
        version,
        format,
        path: entry.path(),
        modified: metadata.modified()?,
      });
    }

    Ok(candidates)
  }

  fn notify(&self, info: &ModelInfo) {
    let observers = self
      .observers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    for observer in observers {
      match catch_unwind(AssertUnwindSafe(|| observer.on_model_reloaded(info))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("模型重载回调出错: {:#}", e),
        Err(_) => error!("模型重载回调发生 panic"),
      }
    }
  }
}

/// 修改时间从新到旧，相同时按文件名倒序
fn sort_newest_first(candidates: &mut [Candidate]) {
  candidates.sort_by(|a, b| {
    b.modified
      .cmp(&a.modified)
      .then_with(|| b.path.cmp(&a.path))
  });
}

/// 名称和版本只能是单个文件名片段
fn validate_component(what: &str, value: &str) -> Result<(), ModelError> {
  if value.is_empty()
    || value == "."
    || value == ".."
    || value.contains(['/', '\\'])
    || value.contains('\0')
  {
    return Err(ModelError::InvalidArgument(format!("{}无效: {:?}", what, value)));
  }
  Ok(())
}
