//! 探测驱动
//!
//! 每个常驻探测由一个后台任务按自身间隔独立驱动。驱动暴露一个停止
//! 信号和一个完成信号：stop发出前者并等待后者，保证停止返回时不会
//! 再产生任何结果。

use crate::error::{CheckError, ProbeError};
use crate::probe::{Probe, ProbeResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 驱动状态机
///
/// `Created → Running → Stopping → Stopped`，Stopped为终态，驱动
/// 不可重启。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// 已创建，驱动尚未启动
    Created,
    /// 驱动任务运行中
    Running,
    /// 停止信号已发出，等待驱动退出
    Stopping,
    /// 驱动已退出
    Stopped,
}

/// 常驻探测：一个探测加上它的驱动任务
pub struct ProbeWorker {
    probe: Arc<dyn Probe>,
    state: WorkerState,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ProbeWorker {
    /// 包装一个已初始化的探测
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            state: WorkerState::Created,
            stop_tx: None,
            handle: None,
        }
    }

    /// 返回被驱动的探测
    pub fn probe(&self) -> Arc<dyn Probe> {
        Arc::clone(&self.probe)
    }

    /// 当前驱动状态
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// 启动驱动任务
    ///
    /// 每个实例至多调用一次；重复调用或在停止后调用返回启动失败。
    ///
    /// # 参数
    /// * `sink` - 结果投递通道
    pub fn start(&mut self, sink: mpsc::Sender<ProbeResult>) -> Result<(), ProbeError> {
        if self.state != WorkerState::Created {
            return Err(ProbeError::StartFailure {
                name: self.probe.name().to_string(),
                reason: "the probe driver was already started".to_string(),
            });
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let probe = Arc::clone(&self.probe);
        let interval = probe.base().interval;
        info!(
            name = %probe.name(),
            kind = probe.kind(),
            "启动探测: {}",
            probe.summary()
        );
        self.handle = Some(tokio::spawn(drive(probe, interval, sink, stop_rx)));
        self.stop_tx = Some(stop_tx);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// 停止驱动并等待其退出
    ///
    /// 幂等；启动前调用为空操作。停止不会打断进行中的执行，驱动在
    /// 当次执行（以探测超时为界）结束后退出。
    pub async fn stop(&mut self) -> Result<(), ProbeError> {
        match self.state {
            WorkerState::Stopped => return Ok(()),
            WorkerState::Created => {
                self.state = WorkerState::Stopped;
                return Ok(());
            }
            _ => {}
        }
        self.state = WorkerState::Stopping;
        debug!(name = %self.probe.name(), "停止探测驱动");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        let joined = match self.handle.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        self.state = WorkerState::Stopped;
        joined.map_err(|e| ProbeError::StopFailure {
            name: self.probe.name().to_string(),
            reason: e.to_string(),
        })?;
        debug!(name = %self.probe.name(), "探测驱动已退出");
        Ok(())
    }
}

/// 驱动循环
///
/// 每个tick：以探测超时为界执行一次，计时并包装成结果，投递到通道。
/// 投递必须尊重停止信号：若投递会阻塞且停止已到来，放弃该结果退出。
/// tick之间收到停止信号时直接退出，不补发最后一次。
async fn drive(
    probe: Arc<dyn Probe>,
    interval: Duration,
    sink: mpsc::Sender<ProbeResult>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // 第一个tick在一个完整间隔之后。执行超过间隔时，挤掉的tick在
    // 执行结束后立即补发一次，其余丢弃，绝不排队。
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                debug!(name = %probe.name(), "驱动收到停止信号");
                return;
            }
            _ = ticker.tick() => {}
        }

        let start = Instant::now();
        let outcome = match timeout(probe.timeout(), probe.execute()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(CheckError::Timeout(probe.timeout())),
        };
        let duration = start.elapsed().as_secs_f64();
        if let Some(err) = &outcome {
            debug!(name = %probe.name(), "探测执行失败: {}", err);
        }
        let result = ProbeResult::new(probe.as_ref(), duration, outcome.as_ref());

        tokio::select! {
            _ = stop_rx.changed() => {
                debug!(name = %probe.name(), "停止信号先于结果投递到达，结果被丢弃");
                return;
            }
            sent = sink.send(result) => {
                if sent.is_err() {
                    warn!(name = %probe.name(), "结果通道已关闭，驱动退出");
                    return;
                }
            }
        }
    }
}
