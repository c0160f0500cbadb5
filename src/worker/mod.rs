pub mod controller;
pub mod signals;
pub mod worker;
