pub mod alias;
pub mod dependence;
pub mod dom;
pub mod invariant;
pub mod loops;
pub mod trip_count;
