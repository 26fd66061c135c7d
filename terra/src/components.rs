/// Components that are placed on the field unit.
pub mod field {
    /// Components that provide sensing capability.
    pub mod sensing {
        /// The acquisition cycle fusing every sensor into one reading.
        pub mod fusion;
    }
    /// Components that move readings off the unit.
    pub mod publishing {
        /// Sinks for the fused readings.
        pub mod publisher;
    }
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::field::publishing::publisher::*;
    pub use crate::components::field::sensing::fusion::*;
}
