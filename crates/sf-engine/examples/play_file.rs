//! Play an audio file through the full pipeline (symphonia decode,
//! cpal output, worker-thread fill cycle).
//!
//! Usage: cargo run --example play_file -- <file> [seconds]

use std::time::{Duration, Instant};

use sf_engine::{ListenerPose, PlaybackEngine, SoundBinding};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: play_file <file> [seconds]");
        std::process::exit(2);
    };
    let max_seconds: f64 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30.0);

    let mut binding = SoundBinding::new(PlaybackEngine::with_defaults());
    binding.set_spatialize(false);
    binding.set_source(&[path.clone()], &[]);
    if binding.engine().clip().playlist().is_empty() {
        eprintln!("cannot resolve '{path}'");
        std::process::exit(1);
    }

    let listener = ListenerPose::default();
    let started = Instant::now();
    loop {
        let now = started.elapsed().as_secs_f64();
        let outcome = binding.render_tick(now, &listener);
        if outcome.became_inactive || now > max_seconds {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    binding.detach();
}
