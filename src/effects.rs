//! Multi-step animations. Every step is one atomic grid mutation and every
//! wait is a cancellable sleep.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::color::Rgb;
use crate::grid::LedGrid;

/// Colors of the walking LED, one per lap
const DEMO_COLORS: [Rgb; 3] = [Rgb::RED, Rgb::GREEN, Rgb::BLUE];

#[derive(Debug, Clone)]
pub enum Effect {
    /// Interpolate each cell from `start` to `target`
    Fade {
        start: Vec<Rgb>,
        target: Rgb,
        steps: u32,
        interval: Duration,
    },
    /// Walk a single lit LED over a black grid until cancelled
    Demo { interval: Duration },
}

impl Effect {
    pub async fn run(self, grid: Arc<LedGrid>, token: CancellationToken) {
        match self {
            Effect::Fade {
                start,
                target,
                steps,
                interval,
            } => fade(&grid, &token, &start, target, steps, interval).await,
            Effect::Demo { interval } => demo(&grid, &token, interval).await,
        }
    }
}

/// Returns `false` if cancelled during the wait
async fn wait(token: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

async fn fade(
    grid: &LedGrid,
    token: &CancellationToken,
    start: &[Rgb],
    target: Rgb,
    steps: u32,
    interval: Duration,
) {
    for step in 1..=steps {
        if !wait(token, interval).await {
            trace!("Fade to {} cancelled before step {}", target, step);
            return;
        }
        let applied = grid.update_unless_cancelled(token, |i, current| {
            start
                .get(i)
                .map_or(current, |from| from.lerp(target, step, steps))
        });
        if !applied {
            trace!("Fade to {} cancelled at step {}", target, step);
            return;
        }
    }
    trace!("Fade to {} complete", target);
}

async fn demo(grid: &LedGrid, token: &CancellationToken, interval: Duration) {
    let led_count = grid.layout().led_count();
    let mut tick = 0usize;
    loop {
        let lit = tick % led_count;
        let color = DEMO_COLORS[(tick / led_count) % DEMO_COLORS.len()];
        let applied = grid.update_unless_cancelled(token, |i, _| {
            if i == lit {
                color
            } else {
                Rgb::BLACK
            }
        });
        if !applied || !wait(token, interval).await {
            trace!("Demo cancelled after {} steps", tick);
            return;
        }
        tick = tick.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::RecordingObserver;
    use crate::grid::GridLayout;

    fn grid(background: Rgb) -> (Arc<LedGrid>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let layout = GridLayout::new(4, 4).unwrap();
        let grid = Arc::new(LedGrid::new(layout, background, observer.clone()));
        (grid, observer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_reaches_target_in_steps() {
        let (grid, observer) = grid(Rgb::BLACK);
        grid.set_led(0, Rgb::RED).unwrap();

        let effect = Effect::Fade {
            start: grid.snapshot(),
            target: Rgb::WHITE,
            steps: 4,
            interval: Duration::from_millis(10),
        };
        effect.run(grid.clone(), CancellationToken::new()).await;

        let updates = observer.updates.lock();
        // one set_led plus four fade steps
        assert_eq!(updates.len(), 5);
        assert_eq!(updates[1][1], Rgb::new(63, 63, 63));
        assert_eq!(updates[1][0], Rgb::new(255, 63, 63));
        assert!(updates[4].iter().all(|c| *c == Rgb::WHITE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fade_stops_writing() {
        let (grid, observer) = grid(Rgb::WHITE);
        let token = CancellationToken::new();
        let effect = Effect::Fade {
            start: grid.snapshot(),
            target: Rgb::BLACK,
            steps: 100,
            interval: Duration::from_millis(10),
        };
        let handle = tokio::spawn(effect.run(grid.clone(), token.clone()));

        tokio::time::sleep(Duration::from_millis(35)).await;
        token.cancel();
        handle.await.unwrap();

        let written = observer.updates.lock().len();
        assert_eq!(written, 3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(observer.updates.lock().len(), written);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_walks_one_led() {
        let (grid, observer) = grid(Rgb::WHITE);
        let token = CancellationToken::new();
        let effect = Effect::Demo {
            interval: Duration::from_millis(10),
        };
        let handle = tokio::spawn(effect.run(grid.clone(), token.clone()));

        tokio::time::sleep(Duration::from_millis(45)).await;
        token.cancel();
        handle.await.unwrap();

        let updates = observer.updates.lock();
        assert_eq!(updates.len(), 5);
        for (tick, update) in updates.iter().enumerate() {
            let lit = tick % 4;
            let color = if tick < 4 { Rgb::RED } else { Rgb::GREEN };
            for (i, cell) in update.iter().enumerate() {
                let expected = if i == lit { color } else { Rgb::BLACK };
                assert_eq!(*cell, expected, "tick {} cell {}", tick, i);
            }
        }
    }
}
