// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Host-side daemon library for quad SATA HAT boards: fan curves, PWM
//! output, button gesture decoding and the actions bound to each gesture.

pub mod actions;
pub mod button;
pub mod config;
pub mod curve;
pub mod display;
pub mod error;
pub mod fan;
pub mod gpio;
pub mod protocol;
pub mod pwm;
pub mod sata;
pub mod sensors;
