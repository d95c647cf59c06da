mod deployment;
mod intents;
mod reconcile;
mod rpc;
