//! Interface tests for the recharge workflow using Cucumber.
//!
//! ```bash
//! cargo test --test interfaces
//! ```

mod steps;

use cucumber::World;
use steps::recharge::RechargeWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running Recharge Interface Tests ===\n");
    RechargeWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/recharge.feature")
        .await;
}
