use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic millisecond counter.
///
/// Wraps after `u32::MAX` milliseconds (about 49.7 days); all deadline
/// arithmetic over this value must stay in wrapping `u32` space so the
/// wrap cancels out.
pub fn tick() -> u32 {
    EPOCH.elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances() {
        let before = tick();

        std::thread::sleep(std::time::Duration::from_millis(5));

        let elapsed = tick().wrapping_sub(before);
        assert!(elapsed >= 5 && elapsed < 60_000, "elapsed {}", elapsed);
    }
}
