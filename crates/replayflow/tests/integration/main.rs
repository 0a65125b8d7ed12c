mod decision_worker;
mod runtime;
mod scenarios;
mod support;
mod task_worker;
