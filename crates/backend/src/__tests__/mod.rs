mod daemon;
mod helpers;
mod scheduler;
