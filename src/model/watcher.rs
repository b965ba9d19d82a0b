// 该文件是 Shanan Edge （山南边缘推理服务） 项目的一部分。
// src/model/watcher.rs - 模型文件变更监控线程
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
  io,
  sync::{Arc, Condvar, Mutex, PoisonError, Weak, mpsc},
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, warn};

use super::ModelLoader;

#[derive(Default)]
struct StopSignal {
  stopped: Mutex<bool>,
  condvar: Condvar,
}

impl StopSignal {
  fn stop(&self) {
    *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
    self.condvar.notify_all();
  }

  /// 等待一个周期，返回是否已收到停止信号
  fn wait(&self, interval: Duration) -> bool {
    let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
    let (guard, _) = self
      .condvar
      .wait_timeout_while(guard, interval, |stopped| !*stopped)
      .unwrap_or_else(PoisonError::into_inner);
    *guard
  }
}

/// 轮询模型文件校验和的后台线程
///
/// 只持有加载器的弱引用，加载器释放后线程自行退出。
pub(crate) struct Watcher {
  signal: Arc<StopSignal>,
  handle: Option<JoinHandle<()>>,
  done: mpsc::Receiver<()>,
}

impl Watcher {
  pub(crate) fn spawn(loader: Weak<ModelLoader>, interval: Duration) -> io::Result<Self> {
    let signal = Arc::new(StopSignal::default());
    let (done_tx, done) = mpsc::channel();

    let thread_signal = signal.clone();
    let handle = thread::Builder::new()
      .name("model-hot-reload".to_string())
      .spawn(move || {
        while !thread_signal.wait(interval) {
          let Some(loader) = loader.upgrade() else {
            debug!("模型加载器已释放, 监控线程退出");
            break;
          };
          if let Err(e) = loader.check_for_changes() {
            error!("热更新检查失败: {}", e);
          }
        }
        let _ = done_tx.send(());
      })?;

    Ok(Self {
      signal,
      handle: Some(handle),
      done,
    })
  }

  /// 发出停止信号并在 `timeout` 内等待线程退出，超时则放弃等待
  pub(crate) fn stop(mut self, timeout: Duration) {
    self.signal.stop();

    match self.done.recv_timeout(timeout) {
      Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
        if let Some(handle) = self.handle.take() {
          if handle.join().is_err() {
            warn!("热更新监控线程异常退出");
          }
        }
      }
      Err(mpsc::RecvTimeoutError::Timeout) => {
        warn!("热更新监控线程未在 {:?} 内退出, 不再等待", timeout);
        self.handle.take();
      }
    }
  }
}

impl Drop for Watcher {
  fn drop(&mut self) {
    self.signal.stop();
  }
}
