// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host threads driving the deferred and power bodies.
//!
//! The interrupt handler unparks the matching thread; each thread runs its
//! body once per wake-up. Workers attach to a transport once.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::error::{Error, Result};
use crate::transport::Transport;

pub struct Workers {
    stop: Arc<AtomicBool>,
    deferred: Option<JoinHandle<()>>,
    power: Option<JoinHandle<()>>,
}

fn spawn_loop(
    name: &str,
    transport: Arc<Transport>,
    stop: Arc<AtomicBool>,
    body: fn(&Transport),
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                body(&transport);
                thread::park();
            }
            debug!("dsp-bridge: {} exiting", thread::current().name().unwrap_or("worker"));
        })
        .map_err(|err| {
            error!("dsp-bridge: spawning {name}: {err}");
            Error::ResourceExhaustion("worker thread")
        })
}

impl Workers {
    /// Starts both workers and routes interrupt wake-ups to them.
    pub fn spawn(transport: Arc<Transport>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let deferred = spawn_loop("dsp-bridge-dpc", transport.clone(), stop.clone(), |t| {
            t.run_deferred();
        })?;
        let mut workers = Self { stop: stop.clone(), deferred: Some(deferred), power: None };
        workers.power = Some(spawn_loop("dsp-bridge-pm", transport.clone(), stop, |t| {
            t.run_power();
        })?);

        let (Some(deferred), Some(power)) = (&workers.deferred, &workers.power) else {
            return Err(Error::InvalidState);
        };
        if !transport.kick.attach(deferred.thread().clone(), power.thread().clone()) {
            return Err(Error::InvalidState);
        }
        transport.kick.wake_all();
        Ok(workers)
    }

    /// Stops both threads and waits for them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in [self.deferred.take(), self.power.take()].into_iter().flatten() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("dsp-bridge: worker thread panicked");
            }
        }
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
