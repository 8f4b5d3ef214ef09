pub mod allocator;
pub mod assignment;
