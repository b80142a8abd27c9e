//! End-to-end bring-up scenarios against the simulated processor.
