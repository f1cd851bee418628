//! Parallel dot product over a 2x2 mesh
//!
//! Each core owns a strip of both vectors, computes its partial sum in the
//! first superstep, and sends it to core 0, which accumulates the total in
//! the second. Run with `cargo run --example dot_product`.

use lockstep::{CoreContext, RegionConfig, Result, SharedRegion};
use std::thread;

const CHUNK: usize = 64;

fn core_main(mut core: CoreContext) -> Result<()> {
    let pid = core.pid();
    let base = pid * CHUNK;
    let partial: u64 = (0..CHUNK)
        .map(|i| {
            let x = (base + i) as u64;
            let y = (2 * (base + i)) as u64;
            x * y
        })
        .sum();

    core.send(0, &[], &partial.to_le_bytes())?;
    core.sync();

    if pid == 0 {
        let mut total = 0u64;
        let mut buf = [0u8; 8];
        while core.move_message(&mut buf).is_some() {
            total += u64::from_le_bytes(buf);
        }
        let n = (core.nprocs() * CHUNK) as u64;
        let expected: u64 = (0..n).map(|i| i * 2 * i).sum();
        println!("dot product = {total} (expected {expected})");
        assert_eq!(total, expected);
    }
    core.sync();
    core.end();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RegionConfig {
        rows: 2,
        cols: 2,
        ..RegionConfig::default()
    };
    let region = SharedRegion::new(config);

    let handles: Vec<_> = (0..region.nprocs())
        .map(|pid| {
            let region = region.clone();
            let grid = *region.grid();
            thread::spawn(move || core_main(CoreContext::begin(region, grid.row_of(pid), grid.col_of(pid))?))
        })
        .collect();

    for handle in handles {
        handle.join().expect("core panicked").expect("core failed");
    }
}
