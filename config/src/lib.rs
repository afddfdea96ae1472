#![no_std]

pub mod cleancache;
pub mod mm;
