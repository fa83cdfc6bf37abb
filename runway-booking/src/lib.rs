pub mod manager;
pub mod flights;
pub mod audience;
pub mod fanout;
pub mod memory;

pub use manager::{BookFlightInput, BookingManager};
pub use flights::FlightService;
pub use audience::{Audience, AudienceResolver};
pub use fanout::{FanoutReport, StatusFanout};
pub use memory::InMemoryLedger;
