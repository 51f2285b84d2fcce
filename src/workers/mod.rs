pub mod payment_poller;
