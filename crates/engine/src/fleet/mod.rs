//! Reference ride-hailing simulation.
//!
//! Vehicles start idle somewhere on a square map. Customers appear over time,
//! each wanting a ride from a pickup point to a drop-off point. Time is
//! event-driven: [`Fleet::advance`] processes everything due at the current
//! clock and then jumps the clock straight to the next due event.

pub mod dispatch;
pub mod position;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

pub use dispatch::FleetStep;
pub use position::Point;

/// Side length of the square map.
pub const AREA_SIZE: f64 = 20.0;

/// Distance a vehicle covers per time unit.
pub const VEHICLE_SPEED: f64 = 1.0;

/// Average gap between two customer requests.
pub const REQUEST_SPACING: f64 = 4.0;

/// Two clock readings closer than this are the same instant.
pub(crate) const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Pickup,
    DropOff,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VehicleState {
    Idle,
    EnRoute {
        customer: usize,
        leg: Leg,
        origin: Point,
        destination: Point,
        departed_at: f64,
        arrives_at: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Vehicle {
    pub id: String,
    pub position: Point,
    #[serde(flatten)]
    pub state: VehicleState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CustomerState {
    /// Not yet requested a ride.
    Pending,
    /// Requested, no vehicle free yet.
    Waiting,
    Assigned { vehicle: usize },
    Riding { vehicle: usize },
    Delivered { at: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub id: String,
    pub pickup: Point,
    pub dropoff: Point,
    pub requested_at: f64,
    #[serde(flatten)]
    pub state: CustomerState,
}

/// Complete state of one fleet simulation.
#[derive(Debug, Clone, Serialize)]
pub struct Fleet {
    pub clock: f64,
    pub vehicles: Vec<Vehicle>,
    pub customers: Vec<Customer>,
}

impl Fleet {
    /// Deterministically generate a fleet from `seed`.
    pub fn generate(vehicles: usize, customers: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let vehicles = (0..vehicles)
            .map(|i| Vehicle {
                id: format!("vehicle-{i}"),
                position: random_point(&mut rng),
                state: VehicleState::Idle,
            })
            .collect();

        // The first request arrives at t=0 so the opening step has work to do.
        let mut requested_at = 0.0;
        let customers = (0..customers)
            .map(|i| {
                let customer = Customer {
                    id: format!("customer-{i}"),
                    pickup: random_point(&mut rng),
                    dropoff: random_point(&mut rng),
                    requested_at,
                    state: CustomerState::Pending,
                };
                requested_at += rng.gen_range(0.5..1.5) * REQUEST_SPACING;
                customer
            })
            .collect();

        Self {
            clock: 0.0,
            vehicles,
            customers,
        }
    }

    pub fn delivered(&self) -> usize {
        self.customers
            .iter()
            .filter(|c| matches!(c.state, CustomerState::Delivered { .. }))
            .count()
    }

    pub fn idle_vehicles(&self) -> usize {
        self.vehicles
            .iter()
            .filter(|v| v.state == VehicleState::Idle)
            .count()
    }
}

fn random_point(rng: &mut ChaCha8Rng) -> Point {
    Point::new(rng.gen_range(0.0..AREA_SIZE), rng.gen_range(0.0..AREA_SIZE))
}
