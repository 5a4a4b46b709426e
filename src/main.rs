//! Live multi-layer MIDI looper.
//!
//! Connects a MIDI input and output, routes control-surface gestures into
//! the loop engine, and drives the engine clock at ~1 kHz. Performance
//! input passes through to the output while it is being recorded; the
//! closed loop replays through the same output.

mod cell;
mod config;
mod control;
mod looper;
mod midi;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use midir::MidiInput;

use config::LooperConfig;
use control::{ControlMap, Routed};
use looper::Loop;
use midi::{MidiEvent, MidiOut};

/// Engine clock resolution: one tick per millisecond.
const TICKS_PER_SECOND: u64 = 1000;

fn main() {
    let config_path = LooperConfig::default_path();
    let config = match LooperConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} - using defaults", e);
            LooperConfig::default()
        }
    };
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            eprintln!("{}", e);
        }
    }

    let mut midi_out = match MidiOut::new(config.output_device.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    // The engine owns the output through its sink; everything it decides
    // to emit goes straight to the wire.
    let engine = Arc::new(Mutex::new(Loop::with_capacity(
        config.cell_capacity,
        move |ev: MidiEvent| {
            if let Err(e) = midi_out.send_event(&ev) {
                eprintln!("{}", e);
            }
        },
    )));

    let _midi_in_connection =
        match start_midi_listener(&config, config.control_map(), engine.clone()) {
            Ok((conn, port_name)) => {
                println!("MIDI input connected to: {}", port_name);
                Some(conn)
            }
            Err(e) => {
                eprintln!("{}", e);
                None
            }
        };

    start_tick_driver(engine.clone());

    let status = engine.lock().unwrap().status();
    println!(
        "Looper ready: {} layers, {} cells, control surface on channel {}",
        looper::MAX_LAYERS,
        status.cells_free,
        config.control_channel
    );
    println!("Press Enter to quit...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}

/// Connect the MIDI input and feed every message through the control map
/// into the engine.
fn start_midi_listener(
    config: &LooperConfig,
    control_map: ControlMap,
    engine: Arc<Mutex<Loop>>,
) -> Result<(midir::MidiInputConnection<()>, String), String> {
    let midi_in = MidiInput::new("overdub-in")
        .map_err(|e| format!("Failed to create MIDI input: {}", e))?;

    let ports = midi_in.ports();
    if ports.is_empty() {
        return Err("No MIDI input ports found".to_string());
    }

    let port_idx = config
        .input_device
        .as_deref()
        .and_then(|wanted| {
            ports.iter().position(|p| {
                midi_in
                    .port_name(p)
                    .map(|n| n.contains(wanted))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(0);

    let port = &ports[port_idx];
    let port_name = midi_in
        .port_name(port)
        .unwrap_or_else(|_| "Unknown".to_string());

    let connection = midi_in
        .connect(
            port,
            "overdub-in",
            move |_timestamp, message, _| {
                let ev = match MidiEvent::from_bytes(message) {
                    Some(ev) => ev,
                    // system messages and noise stay out of the engine
                    None => return,
                };
                let mut engine = engine.lock().unwrap();
                match control_map.route(ev) {
                    Routed::Command(cmd) => control::apply(cmd, &mut engine),
                    Routed::Record(ev) => engine.add_event(ev),
                    Routed::Ignore => {}
                }
            },
            (),
        )
        .map_err(|e| format!("Failed to connect MIDI input: {}", e))?;

    Ok((connection, port_name))
}

/// Drive `Loop::advance` at the engine's tick rate.
fn start_tick_driver(engine: Arc<Mutex<Loop>>) {
    std::thread::spawn(move || {
        let start = Instant::now();
        let mut tick: u64 = 0;

        loop {
            let now_ticks = start.elapsed().as_millis() as u64;
            engine.lock().unwrap().advance(now_ticks);

            // Compute the next deadline from the start instant so sleep
            // error does not accumulate.
            tick += 1;
            let target_nanos = tick * 1_000_000_000 / TICKS_PER_SECOND;
            let target = start + Duration::from_nanos(target_nanos);
            let now = Instant::now();
            if target > now {
                std::thread::sleep(target - now);
            }
        }
    });
}
