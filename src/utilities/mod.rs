/*
 * msock - cancellable sockets and condition-driven stream demultiplexing
 * This is free and unencumbered software released into the public domain.
 */
mod flag;
mod signal;
mod timeout;

pub(crate) use flag::Flag;
pub(crate) use signal::Signal;
pub(crate) use timeout::Timeout;
