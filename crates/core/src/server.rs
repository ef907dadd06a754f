//! Process-level orchestrator: binds the Publish Server and Client Server
//! listeners, shares one `MountRegistry`/`PortPool`/`WrapperRegistry`
//! between them, and runs the dedicated keepalive/sweep timer thread.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::mount::MountRegistry;
use crate::pool::PortPool;
use crate::session::WrapperRegistry;
use crate::transport::tcp;

/// Owns every shared aggregate and the threads that serve them. One
/// instance per process.
pub struct Relay {
    config: RelayConfig,
    mounts: MountRegistry,
    wrappers: WrapperRegistry,
    pool: PortPool,
    running: Arc<AtomicBool>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let pool = PortPool::new(config.rtp_port_pool_start, config.rtp_port_pool_count);
        let mounts = MountRegistry::new(pool.clone());
        Self {
            config,
            mounts,
            wrappers: WrapperRegistry::new(),
            pool,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    pub fn wrappers(&self) -> &WrapperRegistry {
        &self.wrappers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind both listeners and spawn their accept loops plus the timer
    /// thread. Each runs on its own OS thread, matching the rest of the
    /// relay's one-thread-per-connection model.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::Internal("relay already running".to_string()));
        }

        let publisher_listener = TcpListener::bind(&self.config.publisher_bind_addr)?;
        publisher_listener.set_nonblocking(true)?;

        let subscriber_listener = if self.config.subscriber_bind_addr == self.config.publisher_bind_addr {
            publisher_listener.try_clone()?
        } else {
            let l = TcpListener::bind(&self.config.subscriber_bind_addr)?;
            l.set_nonblocking(true)?;
            l
        };

        tracing::info!(
            publisher = %self.config.publisher_bind_addr,
            subscriber = %self.config.subscriber_bind_addr,
            "relay listening"
        );

        let running = self.running.clone();
        let mounts = self.mounts.clone();
        let publisher_hooks = Arc::new(self.config.publisher_hooks.clone());
        thread::spawn(move || {
            tcp::publisher_accept_loop(publisher_listener, mounts, publisher_hooks, running);
        });

        let running = self.running.clone();
        let mounts = self.mounts.clone();
        let wrappers = self.wrappers.clone();
        let pool = self.pool.clone();
        let subscriber_hooks = Arc::new(self.config.subscriber_hooks.clone());
        let keepalive_secs = self.config.keepalive_secs;
        thread::spawn(move || {
            tcp::subscriber_accept_loop(
                subscriber_listener,
                mounts,
                wrappers,
                pool,
                subscriber_hooks,
                keepalive_secs,
                running,
            );
        });

        let running = self.running.clone();
        let mounts = self.mounts.clone();
        let wrappers = self.wrappers.clone();
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs);
        let client_close = self.config.subscriber_hooks.client_close.clone();
        thread::spawn(move || Self::timer_loop(running, mounts, wrappers, sweep_interval, client_close));

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("relay stopping");
    }

    fn timer_loop(
        running: Arc<AtomicBool>,
        mounts: MountRegistry,
        wrappers: WrapperRegistry,
        interval: Duration,
        client_close: Option<crate::mount::MountEmptyHook>,
    ) {
        while running.load(Ordering::SeqCst) {
            thread::sleep(interval);
            wrappers.sweep(&mounts, Instant::now(), |mount| {
                if let Some(hook) = &client_close {
                    hook(mount);
                }
            });
        }
        tracing::debug!("timer loop exited");
    }
}
