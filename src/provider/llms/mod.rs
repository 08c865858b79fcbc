pub mod simple_expert;
