//! Ground truth oracle for simulation.
//!
//! The oracle owns the "true" trajectory of the simulated vehicle:
//! - A scripted plan of drive and hold segments
//! - Constant-speed kinematics along each segment
//! - GPS fix generation (with seeded jitter)

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use roadmate_core::{geo, PositionFix};
use roadmate_env::GeoPoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How GPS fixes deviate from the true position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Jitter {
    None,
    /// Independent north/east offsets, N(0, std_m)
    Gaussian { std_m: f64 },
    /// Independent north/east offsets, uniform in [-max_m, max_m]
    Uniform { max_m: f64 },
}

/// One piece of the scripted trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment {
    Drive { to: GeoPoint, speed_mps: f64 },
    Hold { remaining_s: f64 },
}

/// The Oracle - maintains the true vehicle position and generates fixes.
pub struct DriveOracle {
    /// RNG for jitter (separate from the context so plans stay stable)
    physics_rng: ChaCha8Rng,

    position: GeoPoint,
    plan: VecDeque<Segment>,
    jitter: Jitter,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Distance travelled (meters)
    odometer_m: f64,
}

impl DriveOracle {
    /// Creates an oracle parked at `start`.
    pub fn new(physics_seed: u64, start: GeoPoint) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            position: start,
            plan: VecDeque::new(),
            jitter: Jitter::None,
            current_time: 0.0,
            odometer_m: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Appends a constant-speed drive to `to`.
    pub fn drive_to(mut self, to: GeoPoint, speed_mps: f64) -> Self {
        self.plan.push_back(Segment::Drive {
            to,
            speed_mps: speed_mps.max(0.1),
        });
        self
    }

    /// Appends a stop of `secs` seconds.
    pub fn hold(mut self, secs: f64) -> Self {
        self.plan.push_back(Segment::Hold {
            remaining_s: secs.max(0.0),
        });
        self
    }

    /// Advances the vehicle by dt seconds along the plan.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let mut budget = dt;

        while budget > 0.0 {
            let Some(segment) = self.plan.front_mut() else {
                return;
            };
            match segment {
                Segment::Hold { remaining_s } => {
                    if *remaining_s > budget {
                        *remaining_s -= budget;
                        return;
                    }
                    budget -= *remaining_s;
                    self.plan.pop_front();
                }
                Segment::Drive { to, speed_mps } => {
                    let (to, speed) = (*to, *speed_mps);
                    let left_m = geo::distance_m(self.position, to);
                    let reach_m = speed * budget;
                    if reach_m < left_m {
                        let t = reach_m / left_m;
                        self.position = GeoPoint::new(
                            self.position.lat + (to.lat - self.position.lat) * t,
                            self.position.lon + (to.lon - self.position.lon) * t,
                        );
                        self.odometer_m += reach_m;
                        return;
                    }
                    budget -= left_m / speed;
                    self.position = to;
                    self.odometer_m += left_m;
                    self.plan.pop_front();
                }
            }
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// True position.
    pub fn position(&self) -> GeoPoint {
        self.position
    }

    pub fn odometer_m(&self) -> f64 {
        self.odometer_m
    }

    /// True once every segment of the plan has been completed.
    pub fn finished(&self) -> bool {
        self.plan.is_empty()
    }

    /// Generates a jittered fix for the current position.
    pub fn fix(&mut self, timestamp_ms: u64) -> PositionFix {
        let (north_m, east_m) = match self.jitter {
            Jitter::None => (0.0, 0.0),
            Jitter::Gaussian { std_m } => match Normal::new(0.0, std_m) {
                Ok(normal) => (
                    normal.sample(&mut self.physics_rng),
                    normal.sample(&mut self.physics_rng),
                ),
                Err(_) => (0.0, 0.0),
            },
            Jitter::Uniform { max_m } if max_m > 0.0 => {
                let uniform = Uniform::new_inclusive(-max_m, max_m);
                (
                    uniform.sample(&mut self.physics_rng),
                    uniform.sample(&mut self.physics_rng),
                )
            }
            Jitter::Uniform { .. } => (0.0, 0.0),
        };
        PositionFix::at(geo::offset_m(self.position, north_m, east_m), timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(38.72, -9.14)
    }

    #[test]
    fn test_drive_and_hold() {
        let target = geo::offset_m(origin(), 0.0, 100.0);
        let mut oracle = DriveOracle::new(42, origin())
            .drive_to(target, 10.0)
            .hold(5.0);

        oracle.step(5.0);
        assert!(close(geo::distance_m(origin(), oracle.position()), 50.0, 0.5));

        // Crosses the end of the drive and spends the rest holding
        oracle.step(7.0);
        assert!(close(geo::distance_m(target, oracle.position()), 0.0, 0.01));
        assert!(!oracle.finished());

        oracle.step(3.5);
        assert!(oracle.finished());
        assert!(close(oracle.odometer_m(), 100.0, 0.5));
        assert!(close(oracle.time(), 15.5, 1e-9));
    }

    #[test]
    fn test_deterministic_jitter() {
        let make = || DriveOracle::new(7, origin()).with_jitter(Jitter::Gaussian { std_m: 5.0 });
        let (mut a, mut b) = (make(), make());
        for ts in 0..10 {
            assert_eq!(a.fix(ts), b.fix(ts));
        }
    }

    #[test]
    fn test_uniform_jitter_is_bounded() {
        let mut oracle = DriveOracle::new(3, origin()).with_jitter(Jitter::Uniform { max_m: 20.0 });
        for ts in 0..200 {
            let fix = oracle.fix(ts);
            // Both axes bounded by 20 m, so the offset by 20·√2
            assert!(geo::distance_m(origin(), fix.position()) <= 28.5);
            assert_eq!(fix.timestamp_ms, ts);
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_drive_ends_at_target(
            north in -2000.0f64..2000.0,
            east in -2000.0f64..2000.0,
            speed in 1.0f64..60.0,
            dt in 0.05f64..2.0,
        ) {
            let target = geo::offset_m(origin(), north, east);
            let length = geo::distance_m(origin(), target);
            let mut oracle = DriveOracle::new(1, origin()).drive_to(target, speed);

            let mut last_odometer = 0.0;
            let mut steps = 0;
            while !oracle.finished() && steps < 100_000 {
                oracle.step(dt);
                proptest::prop_assert!(oracle.odometer_m() >= last_odometer);
                last_odometer = oracle.odometer_m();
                steps += 1;
            }

            proptest::prop_assert!(oracle.finished());
            proptest::prop_assert!(geo::distance_m(target, oracle.position()) < 0.01);
            proptest::prop_assert!(close(oracle.odometer_m(), length, 1.0));
        }
    }
}
