//! Applies decoded commands to the grid.
//!
//! Last command wins: fades and the demo cover the whole grid, so every new
//! command cancels the running effect before it is applied.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::color::Rgb;
use crate::config::EffectConfig;
use crate::effects::Effect;
use crate::error::GridError;
use crate::grid::LedGrid;
use crate::protocol::Command;

pub struct CommandExecutor {
    grid: Arc<LedGrid>,
    effects: EffectConfig,
    /// Token of the most recently started effect
    current: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl CommandExecutor {
    pub fn new(grid: Arc<LedGrid>, effects: EffectConfig) -> Self {
        CommandExecutor {
            grid,
            effects,
            current: Mutex::new(CancellationToken::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn grid(&self) -> &Arc<LedGrid> {
        &self.grid
    }

    /// Apply `command`. Effects are spawned onto the current tokio runtime
    /// and this returns without waiting for them.
    pub fn execute(&self, command: Command) -> Result<(), GridError> {
        // Held across the write so cancel-then-apply is atomic with respect
        // to other connections.
        let mut current = self.current.lock();
        current.cancel();
        debug!("Executing {:?}", command);

        match command {
            Command::SetStripe { index, color } => self.grid.set_stripe(usize::from(index), color),
            Command::SetRow { index, color } => self.grid.set_row(usize::from(index), color),
            Command::FadeAllToWhite => {
                *current = self.spawn(self.fade_to(Rgb::WHITE));
                Ok(())
            }
            Command::FadeAllToBlack => {
                *current = self.spawn(self.fade_to(Rgb::BLACK));
                Ok(())
            }
            Command::Demo => {
                let demo = Effect::Demo {
                    interval: self.effects.demo_step(),
                };
                *current = self.spawn(demo);
                Ok(())
            }
        }
    }

    /// Cancel the running effect without waiting for its task to exit
    pub fn cancel_current(&self) {
        self.current.lock().cancel();
    }

    /// Cancel the running effect and wait until every effect task has exited.
    pub async fn cancel_all(&self) {
        self.cancel_current();
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        debug!("All effects stopped");
    }

    /// Number of effect tasks still alive, including cancelled ones that
    /// have not reached a step boundary yet
    pub fn active_effects(&self) -> usize {
        self.tracker.len()
    }

    fn fade_to(&self, target: Rgb) -> Effect {
        Effect::Fade {
            start: self.grid.snapshot(),
            target,
            steps: self.effects.fade_steps,
            interval: self.effects.fade_step(),
        }
    }

    fn spawn(&self, effect: Effect) -> CancellationToken {
        let token = CancellationToken::new();
        self.tracker
            .spawn(effect.run(Arc::clone(&self.grid), token.clone()));
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::RecordingObserver;
    use crate::grid::GridLayout;
    use std::time::Duration;

    fn executor(fade_steps: u32) -> (CommandExecutor, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let grid = Arc::new(LedGrid::new(
            GridLayout::default(),
            Rgb::new(169, 169, 169),
            observer.clone(),
        ));
        let effects = EffectConfig {
            fade_steps,
            fade_step_ms: 10,
            demo_step_ms: 10,
        };
        (CommandExecutor::new(grid, effects), observer)
    }

    #[tokio::test]
    async fn test_set_stripe_is_one_update() {
        let (executor, observer) = executor(4);
        executor
            .execute(Command::SetStripe {
                index: 3,
                color: Rgb::RED,
            })
            .unwrap();

        let updates = observer.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0][3], Rgb::RED);
        assert_eq!(updates[0][2], Rgb::new(169, 169, 169));
        assert_eq!(executor.active_effects(), 0);
    }

    #[tokio::test]
    async fn test_grid_revalidates_index() {
        let (executor, _) = executor(4);
        let result = executor.execute(Command::SetStripe {
            index: 40,
            color: Rgb::RED,
        });
        assert_eq!(
            result,
            Err(GridError::StripeOutOfRange {
                index: 40,
                stripes: 32
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_runs_to_completion() {
        let (executor, _) = executor(4);
        executor.execute(Command::FadeAllToBlack).unwrap();
        assert_eq!(executor.active_effects(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(executor.grid().snapshot().iter().all(|c| *c == Rgb::BLACK));
        assert_eq!(executor.active_effects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_write_survives_running_fade() {
        let (executor, _) = executor(50);
        executor.execute(Command::FadeAllToWhite).unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        executor
            .execute(Command::SetStripe {
                index: 0,
                color: Rgb::BLUE,
            })
            .unwrap();

        let generation = executor.grid().generation();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(executor.grid().snapshot()[0], Rgb::BLUE);
        assert_eq!(executor.grid().generation(), generation);
        assert_eq!(executor.active_effects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_effect_replaces_old() {
        let (executor, _) = executor(4);
        executor.execute(Command::Demo).unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        executor.execute(Command::FadeAllToWhite).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(executor.grid().snapshot().iter().all(|c| *c == Rgb::WHITE));
        assert_eq!(executor.active_effects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_demo() {
        let (executor, _) = executor(4);
        executor.execute(Command::Demo).unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        executor.cancel_all().await;
        assert_eq!(executor.active_effects(), 0);

        let generation = executor.grid().generation();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(executor.grid().generation(), generation);

        // Still usable afterwards
        executor.execute(Command::FadeAllToBlack).unwrap();
        assert_eq!(executor.active_effects(), 1);
        executor.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_current_stops_demo_without_waiting() {
        let (executor, _) = executor(4);
        executor.execute(Command::Demo).unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        executor.cancel_current();
        let generation = executor.grid().generation();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.grid().generation(), generation);
        assert_eq!(executor.active_effects(), 0);
    }
}
