// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host-side driver for scripted DSP bridge scenarios
//! OWNERS: @runtime
//! STATUS: Experimental
//!
//! Loads a TOML scenario, brings a transport up against the simulated
//! coprocessor and replays the steps, printing completions, messages, power
//! requests and the final counters.

mod scenario;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bridge_hal::{HeapWindow, RecordingMapper};
use clap::Parser;
use dsp_bridge::isr::MBX_PCPY_CLASS;
use dsp_bridge::sim::{tally, RecordingMailbox, ScriptedInterrupts, SimDsp, SimOutput};
use dsp_bridge::{
    BridgeConfig, ChannelId, Direction, DspMsg, ExitNotify, IrqOutcome, MsgQueue, MsgQueueId, PowerControl,
    SharedBus, Transport, TransportBuilder, Wait,
};
use log::{info, warn};
use thiserror::Error;

use crate::scenario::{Scenario, Step};

const HOST_PHYSICAL: u64 = 0x8000_0000;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("reading {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("scenario: {0}")]
    Scenario(#[from] toml::de::Error),
    #[error("bridge: {0}")]
    Bridge(#[from] dsp_bridge::Error),
    #[error("destination {0} is not registered in this scenario")]
    UnknownQueue(MsgQueueId),
}

#[derive(Parser)]
#[command(name = "bridge-sim", about = "Replay a DSP bridge scenario against the simulated coprocessor")]
struct Args {
    /// Scenario file (TOML).
    scenario: PathBuf,
    /// Transport config that replaces the scenario's `[config]` table.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the effective transport config and exit.
    #[arg(long)]
    dump_config: bool,
}

/// Power hooks that only log what the coprocessor asked for.
struct LoggedPower;

impl PowerControl for LoggedPower {
    fn hibernate(&self) -> Result<(), String> {
        println!("power: hibernate");
        Ok(())
    }

    fn set_operating_point(&self, index: u8) -> Result<(), String> {
        println!("power: operating point {index}");
        Ok(())
    }

    fn clock_control(&self, code: u16) -> Result<(), String> {
        println!("power: clock control {code:#06x}");
        Ok(())
    }
}

struct Session {
    scenario: Scenario,
    transport: Transport,
    dsp: SimDsp,
    irq: Arc<ScriptedInterrupts>,
    mailbox: Arc<RecordingMailbox>,
    queues: HashMap<MsgQueueId, MsgQueue>,
    channels: BTreeSet<ChannelId>,
    outputs: Vec<SimOutput>,
}

impl Session {
    fn start(scenario: Scenario, config: BridgeConfig) -> Result<Self, SimError> {
        let bus: SharedBus = Arc::new(HeapWindow::new(scenario.window_len));
        let irq = Arc::new(ScriptedInterrupts::new(64));
        let mailbox = Arc::new(RecordingMailbox::new());
        let mmu = Arc::new(RecordingMapper::new());
        let transport = TransportBuilder::new(config)
            .window(HOST_PHYSICAL, bus.clone())
            .mailbox(mailbox.clone())
            .interrupt_source(irq.clone())
            .mmu(mmu.clone())
            .power(Arc::new(LoggedPower))
            .build(&scenario.image.symbols())?;
        let regions = transport.regions();
        info!(
            "bridge-sim: window mapped with {} entries, slot {} bytes, {} messages per batch",
            mmu.entries().len(),
            regions.channel.slot_size,
            regions.message.capacity
        );
        let dsp = SimDsp::new(bus, regions);
        Ok(Self {
            scenario,
            transport,
            dsp,
            irq,
            mailbox,
            queues: HashMap::new(),
            channels: BTreeSet::new(),
            outputs: Vec::new(),
        })
    }

    fn interrupt(&self, status: u16) {
        self.irq.raise(status);
        match self.transport.handle_interrupt() {
            IrqOutcome::Deferred => {
                self.transport.run_deferred();
            }
            IrqOutcome::PowerQueued(outcome) => {
                info!("bridge-sim: power request {status:#06x} {outcome:?}");
                self.transport.run_power();
            }
            IrqOutcome::Reset => {
                warn!("bridge-sim: coprocessor reset, reload to recover");
                self.transport.run_deferred();
            }
            IrqOutcome::NotOurs => warn!("bridge-sim: interrupt {status:#06x} not claimed"),
        }
    }

    fn doorbell(&self) {
        self.interrupt(MBX_PCPY_CLASS);
    }

    fn queue(&self, id: MsgQueueId) -> Result<&MsgQueue, SimError> {
        self.queues.get(&id).ok_or(SimError::UnknownQueue(id))
    }

    fn apply(&mut self, step: Step) -> Result<(), SimError> {
        match step {
            Step::Open { channel, direction } => {
                self.transport.open_channel(channel, direction.into())?;
                self.channels.insert(channel);
            }
            Step::Close { channel } => {
                self.transport.close_channel(channel)?;
                self.channels.remove(&channel);
            }
            Step::Receive { channel, capacity } => {
                self.transport.submit(channel, Direction::Input, vec![0; capacity], 0)?;
            }
            Step::Transmit { channel, data, arg } => {
                self.transport.submit(channel, Direction::Output, data.into_bytes(), arg)?;
            }
            Step::Cancel { channel } => {
                let cancelled = self.transport.cancel(channel)?;
                println!("channel {channel}: cancelled {cancelled}");
            }
            Step::Register { queue } => {
                let on_exit: ExitNotify =
                    Arc::new(|id: MsgQueueId, status: u32| println!("queue {id}: exit ack {status:#x}"));
                let handle = self.transport.register_destination(queue, Some(on_exit))?;
                self.queues.insert(queue, handle);
            }
            Step::Deregister { queue } => {
                self.queues.remove(&queue);
                self.transport.deregister_destination(queue)?;
            }
            Step::Send { queue, cmd, arg1, arg2 } => {
                self.transport.send(queue, DspMsg { cmd, arg1, arg2 }, Wait::NonBlocking)?;
                self.doorbell();
            }
            Step::DspReady { mask } => {
                self.dsp.set_free_mask(mask);
                self.doorbell();
            }
            Step::DspSend { channel, data, arg } => {
                if !self.dsp.send_input(channel, data.as_bytes(), arg) {
                    warn!("bridge-sim: input slot busy, channel {channel} data not sent");
                }
                self.doorbell();
            }
            Step::DspDrain => {
                while let Some(output) = self.dsp.take_output() {
                    println!(
                        "dsp <- channel {}: {:?} arg {}",
                        output.channel,
                        String::from_utf8_lossy(&output.data),
                        output.arg
                    );
                    self.outputs.push(output);
                    self.doorbell();
                }
            }
            Step::DspPost { queue, cmd, arg1, arg2 } => {
                if !self.dsp.post_messages(&[(queue, DspMsg { cmd, arg1, arg2 })]) {
                    warn!("bridge-sim: inbound batch still pending, message to {queue} not posted");
                }
                self.doorbell();
                if let Ok(handle) = self.queue(queue) {
                    while let Ok(msg) = handle.try_get() {
                        println!("queue {queue}: received {msg:?}");
                    }
                }
            }
            Step::DspMessages => {
                for (dest, msg) in self.dsp.take_messages() {
                    println!("dsp <- queue {dest}: {msg:?}");
                }
                self.doorbell();
            }
            Step::DspTrace { text } => {
                self.dsp.write_trace(&text);
                self.doorbell();
            }
            Step::Interrupt { status } => self.interrupt(status),
            Step::Reload => self.transport.reload(&self.scenario.image.symbols())?,
        }
        self.report_completions();
        Ok(())
    }

    fn report_completions(&self) {
        for &channel in &self.channels {
            while let Ok(Some(done)) = self.transport.take_completion(channel) {
                println!(
                    "channel {channel} {:?}: {:?} {} bytes arg {}",
                    done.direction, done.status, done.len, done.arg
                );
            }
        }
    }

    fn run(mut self) -> Result<(), SimError> {
        let steps = std::mem::take(&mut self.scenario.steps);
        for (index, step) in steps.into_iter().enumerate() {
            info!("bridge-sim: step {index}: {step:?}");
            if let Err(err) = self.apply(step) {
                println!("step {index}: {err}");
            }
        }

        let mut totals: Vec<_> = tally(&self.outputs).into_iter().collect();
        totals.sort_unstable();
        for (channel, bytes) in totals {
            println!("channel {channel}: {bytes} bytes to dsp");
        }
        println!("doorbells: {}", self.mailbox.take().len());
        println!("{:#?}", self.transport.stats());
        Ok(())
    }
}

fn run(args: Args) -> Result<(), SimError> {
    let mut scenario = Scenario::load(&args.scenario)?;
    let config = match &args.config {
        Some(path) => BridgeConfig::from_path(path)?,
        None => std::mem::take(&mut scenario.config),
    };
    if args.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    Session::start(scenario, config)?.run()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bridge-sim: {err}");
            ExitCode::FAILURE
        }
    }
}
