//! One fleet step: arrivals, new requests, dispatch, then jump the clock.

use std::collections::HashMap;

use super::{CustomerState, EPSILON, Fleet, Leg, Point, VEHICLE_SPEED, VehicleState};

/// What a single [`Fleet::advance`] did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FleetStep {
    /// Time units until the next due event (the clock has already moved).
    pub wait: f64,
    /// Whether any vehicle or customer changed state.
    pub changed: bool,
    /// Travel time of every leg that began during this step, by vehicle id.
    pub remaining_times: HashMap<String, f64>,
    /// No further events are due; the simulation is over.
    pub finished: bool,
}

impl Fleet {
    /// Process everything due at the current clock, then move the clock to
    /// the next due event.
    pub fn advance(&mut self) -> FleetStep {
        let mut step = FleetStep::default();

        self.process_arrivals(&mut step);
        self.process_requests(&mut step);
        self.dispatch(&mut step);

        match self.next_event_time() {
            Some(next) => {
                let next = next.max(self.clock);
                step.wait = next - self.clock;
                self.move_clock(next);
            }
            None => step.finished = true,
        }

        step
    }

    fn process_arrivals(&mut self, step: &mut FleetStep) {
        let now = self.clock;
        for vi in 0..self.vehicles.len() {
            let VehicleState::EnRoute {
                customer,
                leg,
                destination,
                arrives_at,
                ..
            } = self.vehicles[vi].state
            else {
                continue;
            };
            if arrives_at > now + EPSILON {
                continue;
            }

            self.vehicles[vi].position = destination;
            step.changed = true;

            match leg {
                Leg::Pickup => {
                    self.customers[customer].state = CustomerState::Riding { vehicle: vi };
                    let dropoff = self.customers[customer].dropoff;
                    self.begin_leg(vi, customer, Leg::DropOff, dropoff, step);
                }
                Leg::DropOff => {
                    self.customers[customer].state = CustomerState::Delivered { at: now };
                    self.vehicles[vi].state = VehicleState::Idle;
                }
            }
        }
    }

    fn process_requests(&mut self, step: &mut FleetStep) {
        let now = self.clock;
        for customer in &mut self.customers {
            if customer.state == CustomerState::Pending && customer.requested_at <= now + EPSILON {
                customer.state = CustomerState::Waiting;
                step.changed = true;
            }
        }
    }

    /// Hand waiting customers, oldest request first, to the nearest idle vehicle.
    fn dispatch(&mut self, step: &mut FleetStep) {
        for ci in 0..self.customers.len() {
            if self.customers[ci].state != CustomerState::Waiting {
                continue;
            }
            let pickup = self.customers[ci].pickup;
            let Some(vi) = self.nearest_idle(pickup) else {
                break;
            };
            self.customers[ci].state = CustomerState::Assigned { vehicle: vi };
            self.begin_leg(vi, ci, Leg::Pickup, pickup, step);
            step.changed = true;
        }
    }

    fn begin_leg(
        &mut self,
        vi: usize,
        customer: usize,
        leg: Leg,
        destination: Point,
        step: &mut FleetStep,
    ) {
        let vehicle = &mut self.vehicles[vi];
        let origin = vehicle.position;
        let travel = origin.distance(destination) / VEHICLE_SPEED;
        vehicle.state = VehicleState::EnRoute {
            customer,
            leg,
            origin,
            destination,
            departed_at: self.clock,
            arrives_at: self.clock + travel,
        };
        step.remaining_times.insert(vehicle.id.clone(), travel);
    }

    fn nearest_idle(&self, target: Point) -> Option<usize> {
        self.vehicles
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state == VehicleState::Idle)
            .map(|(i, v)| (i, v.position.distance(target)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    fn next_event_time(&self) -> Option<f64> {
        let arrivals = self.vehicles.iter().filter_map(|v| match v.state {
            VehicleState::EnRoute { arrives_at, .. } => Some(arrives_at),
            VehicleState::Idle => None,
        });
        let requests = self
            .customers
            .iter()
            .filter(|c| c.state == CustomerState::Pending)
            .map(|c| c.requested_at);

        arrivals.chain(requests).min_by(f64::total_cmp)
    }

    /// Move the clock forward, sliding en-route vehicles along their legs.
    fn move_clock(&mut self, to: f64) {
        for vehicle in &mut self.vehicles {
            if let VehicleState::EnRoute {
                origin,
                destination,
                departed_at,
                arrives_at,
                ..
            } = vehicle.state
            {
                let duration = arrives_at - departed_at;
                vehicle.position = if duration <= EPSILON {
                    destination
                } else {
                    origin.lerp(destination, (to - departed_at) / duration)
                };
            }
        }
        self.clock = to;
    }
}
