// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Args;

/// Default core image deployed when the system resource does not pin one.
pub const DEFAULT_CORE_IMAGE: &str = "noobaa/noobaa-core:latest";
pub const DEFAULT_DB_IMAGE: &str = "quay.io/sclorg/postgresql-15-c9s";

/// Settings shared by every controller of the operator process.
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator watches and deploys the system into.
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "noobaa")]
    pub namespace: String,

    #[arg(long, env = "OPERATOR_IMAGE", default_value = "noobaa/noobaa-operator:latest")]
    pub operator_image: String,

    #[arg(long, env = "NOOBAA_CORE_IMAGE", default_value = DEFAULT_CORE_IMAGE)]
    pub core_image: String,

    #[arg(long, env = "NOOBAA_DB_IMAGE", default_value = DEFAULT_DB_IMAGE)]
    pub db_image: String,

    /// Management address override, for running the operator outside the cluster.
    #[arg(long, env = "NOOBAA_MGMT_ADDRESS")]
    pub mgmt_address: Option<String>,

    /// Concurrent reconciles per resource kind.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..=4))]
    pub concurrency: u16,

    #[arg(long, env = "OPERATOR_LEASE_NAME", default_value = "noobaa-operator-lock")]
    pub lease_name: String,

    /// Leader-election identity and event reporter instance.
    #[arg(long, env = "HOSTNAME", default_value = "noobaa-operator")]
    pub identity: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "noobaa".to_owned(),
            operator_image: "noobaa/noobaa-operator:latest".to_owned(),
            core_image: DEFAULT_CORE_IMAGE.to_owned(),
            db_image: DEFAULT_DB_IMAGE.to_owned(),
            mgmt_address: None,
            concurrency: 2,
            lease_name: "noobaa-operator-lock".to_owned(),
            identity: "noobaa-operator".to_owned(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WebhookConfig {
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Namespace holding the system resource the webhook validates against.
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "noobaa")]
    pub namespace: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn test_concurrency_bounds() {
        let cli = Cli::try_parse_from(["op", "--concurrency", "4", "--namespace", "ns"]).unwrap();
        assert_eq!(cli.config.concurrency, 4);
        assert_eq!(cli.config.namespace, "ns");
        assert!(Cli::try_parse_from(["op", "--concurrency", "5"]).is_err());
        assert!(Cli::try_parse_from(["op", "--concurrency", "0"]).is_err());
    }
}
