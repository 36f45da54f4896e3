use std::f64::consts::PI;

/// A learning rate as a function of the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrSchedule {
    Constant,
    /// Multiplies the rate by `gamma` every `step_size` epochs.
    Step { step_size: usize, gamma: f64 },
    /// Multiplies the rate by `gamma` every epoch.
    Exponential { gamma: f64 },
    /// Anneals from the base rate to `min_lr` over `t_max` epochs following half a cosine, then
    /// stays at `min_lr`.
    Cosine { t_max: usize, min_lr: f64 },
    /// Grows linearly from `base_lr / warmup_epochs` to the base rate, then stays constant.
    Warmup { warmup_epochs: usize },
}

impl LrSchedule {
    /// The learning rate at `epoch`, counting from zero.
    pub fn rate(&self, base_lr: f64, epoch: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base_lr,
            LrSchedule::Step { step_size, gamma } => {
                base_lr * gamma.powi((epoch / step_size.max(1)) as i32)
            }
            LrSchedule::Exponential { gamma } => base_lr * gamma.powi(epoch as i32),
            LrSchedule::Cosine { t_max, min_lr } => {
                let t = epoch.min(t_max) as f64;
                let t_max = t_max.max(1) as f64;
                min_lr + (base_lr - min_lr) * (1. + (PI * t / t_max).cos()) / 2.
            }
            LrSchedule::Warmup { warmup_epochs } => {
                if epoch < warmup_epochs {
                    base_lr * (epoch + 1) as f64 / warmup_epochs as f64
                } else {
                    base_lr
                }
            }
        }
    }
}

/// Tracks the epoch and yields the scheduled learning rate.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    base_lr: f64,
    schedule: LrSchedule,
    step: usize,
}

impl LrScheduler {
    pub fn new(base_lr: f64, schedule: LrSchedule) -> Self {
        Self {
            base_lr,
            schedule,
            step: 0,
        }
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// The rate for the current epoch.
    pub fn current(&self) -> f64 {
        self.schedule.rate(self.base_lr, self.step)
    }

    /// Moves to the next epoch.
    ///
    /// # Returns
    /// The rate for the new epoch.
    pub fn advance(&mut self) -> f64 {
        self.step += 1;
        self.current()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn step_decay() {
        let schedule = LrSchedule::Step {
            step_size: 2,
            gamma: 0.5,
        };
        let rates: Vec<_> = (0..5).map(|e| schedule.rate(1., e)).collect();
        assert_eq!(rates, [1., 1., 0.5, 0.5, 0.25]);
    }

    #[test]
    fn exponential_decay() {
        let schedule = LrSchedule::Exponential { gamma: 0.9 };
        assert!(close(schedule.rate(2., 2), 2. * 0.81));
    }

    #[test]
    fn cosine_annealing_reaches_the_floor() {
        let schedule = LrSchedule::Cosine {
            t_max: 10,
            min_lr: 0.1,
        };

        assert!(close(schedule.rate(1., 0), 1.));
        assert!(close(schedule.rate(1., 5), 0.55));
        assert!(close(schedule.rate(1., 10), 0.1));
        assert!(close(schedule.rate(1., 50), 0.1));
    }

    #[test]
    fn warmup_grows_linearly() {
        let schedule = LrSchedule::Warmup { warmup_epochs: 4 };
        let rates: Vec<_> = (0..6).map(|e| schedule.rate(1., e)).collect();
        assert_eq!(rates, [0.25, 0.5, 0.75, 1., 1., 1.]);
    }

    #[test]
    fn scheduler_tracks_the_epoch() {
        let mut scheduler = LrScheduler::new(
            1.,
            LrSchedule::Step {
                step_size: 1,
                gamma: 0.5,
            },
        );

        assert_eq!(scheduler.current(), 1.);
        assert_eq!(scheduler.advance(), 0.5);
        assert_eq!(scheduler.advance(), 0.25);

        scheduler.reset();
        assert_eq!(scheduler.current(), 1.);
    }
}
