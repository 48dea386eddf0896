//! Integration tests

mod helpers;
mod test_deploy;
mod test_fsm;
mod test_git;
mod test_release;
mod test_rollback;
