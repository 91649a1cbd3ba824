pub mod clock;
pub mod crdt;
pub mod interval;
pub mod lamport;
pub mod windowed;
