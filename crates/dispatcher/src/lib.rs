pub mod cron_trigger;

pub use cron_trigger::CronTrigger;
