//! Linux netfilter backend driven through the `iptables` command.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::forward::entity::PortMapping;
use domain::forward::selector::{
    RuleOp, RuleSelector, forward_selectors, parse_prerouting_listing, shares_peer_rules,
};
use ports::secondary::command_runner::{CommandOutput, CommandRunner, CommandSpec};
use ports::secondary::firewall_backend::{FirewallBackend, PortFuture};

const IPTABLES: &str = "iptables";

#[derive(Debug, Clone)]
pub struct NetfilterSettings {
    pub public_interface: String,
    pub tunnel_interface: String,
    /// Where `iptables-save` output is written so rules survive a reboot.
    pub persist_path: PathBuf,
}

pub struct NetfilterBackend {
    settings: NetfilterSettings,
    runner: Arc<dyn CommandRunner>,
}

impl NetfilterBackend {
    pub fn new(settings: NetfilterSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn selectors(&self, mapping: &PortMapping) -> [RuleSelector; 3] {
        forward_selectors(
            &self.settings.public_interface,
            &self.settings.tunnel_interface,
            mapping,
        )
    }

    async fn iptables(&self, selector: &RuleSelector, op: RuleOp) -> Result<CommandOutput, DomainError> {
        let spec = CommandSpec::new(IPTABLES)
            .args(selector.args(op))
            .privileged();
        self.runner.run(&spec).await
    }

    /// `iptables -C` exits 0 when the rule exists and 1 when it does not.
    /// Any other exit, or a refused escalation, means the table could not be
    /// inspected.
    async fn exists(&self, selector: &RuleSelector) -> Result<bool, DomainError> {
        let out = self.iptables(selector, RuleOp::Check).await?;
        match out.code {
            _ if out.needs_authorization() => Err(command_failure(selector, RuleOp::Check, &out)),
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_failure(selector, RuleOp::Check, &out)),
        }
    }

    async fn delete_if_present(
        &self,
        selector: &RuleSelector,
        mapping: &PortMapping,
    ) -> Result<(), DomainError> {
        if !self.exists(selector).await? {
            return Ok(());
        }
        let out = self.iptables(selector, RuleOp::Delete).await?;
        if !out.success() {
            let err = command_failure(selector, RuleOp::Delete, &out);
            tracing::error!(chain = selector.chain, mapping = %mapping, error = %err, "netfilter retract failed");
            return Err(err);
        }
        Ok(())
    }

    /// Dump the live ruleset and write it to the persistence file.
    async fn persist(&self) -> Result<(), DomainError> {
        let save = self
            .runner
            .run(&CommandSpec::new("iptables-save").privileged())
            .await?;
        if !save.success() {
            return Err(DomainError::Backend(format!(
                "iptables-save failed: {}",
                save.stderr.trim()
            )));
        }

        let path = self.settings.persist_path.to_string_lossy();
        let tee = CommandSpec::new("tee")
            .arg(path.as_ref())
            .stdin(save.stdout)
            .privileged();
        let out = self.runner.run(&tee).await?;
        if !out.success() {
            return Err(DomainError::Backend(format!(
                "writing {path} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}

fn command_failure(selector: &RuleSelector, op: RuleOp, out: &CommandOutput) -> DomainError {
    DomainError::Backend(format!(
        "`{IPTABLES} {}` failed: {}",
        selector.args(op).join(" "),
        out.stderr.trim()
    ))
}

impl FirewallBackend for NetfilterBackend {
    fn name(&self) -> &'static str {
        "netfilter"
    }

    /// Append each of the three rules unless `-C` finds it already present.
    fn apply<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            for selector in self.selectors(mapping) {
                if self.exists(&selector).await? {
                    tracing::debug!(chain = selector.chain, mapping = %mapping, "rule already present");
                    continue;
                }
                let out = self.iptables(&selector, RuleOp::Append).await?;
                if !out.success() {
                    let err = command_failure(&selector, RuleOp::Append, &out);
                    tracing::error!(mapping = %mapping, error = %err, "netfilter apply failed");
                    return Err(err);
                }
            }
            Ok(())
        })
    }

    /// Delete each rule that `-C` reports present. Absent rules are skipped,
    /// so retracting twice is harmless. The FORWARD and MASQUERADE rules stay
    /// while another DNAT still sends traffic to the same peer port.
    fn retract<'a>(&'a self, mapping: &'a PortMapping) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let [dnat, accept, masquerade] = self.selectors(mapping);
            self.delete_if_present(&dnat, mapping).await?;

            let live = self.list().await?;
            if let Some(other) = live
                .iter()
                .find(|m| *m != mapping && shares_peer_rules(m, mapping))
            {
                tracing::debug!(
                    mapping = %mapping,
                    shared_with = %other,
                    "peer-side rules still in use, keeping them"
                );
                return Ok(());
            }

            self.delete_if_present(&accept, mapping).await?;
            self.delete_if_present(&masquerade, mapping).await
        })
    }

    fn list(&self) -> PortFuture<'_, Vec<PortMapping>> {
        Box::pin(async move {
            let spec = CommandSpec::new(IPTABLES)
                .args(["-t", "nat", "-L", "PREROUTING", "-n", "--line-numbers"])
                .privileged();
            let out = self.runner.run(&spec).await?;
            if !out.success() {
                return Err(DomainError::Backend(format!(
                    "`{}` failed: {}",
                    spec.display(),
                    out.stderr.trim()
                )));
            }
            Ok(parse_prerouting_listing(&out.stdout))
        })
    }

    fn is_configured(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            matches!(
                self.runner.run(&CommandSpec::new("which").arg(IPTABLES)).await,
                Ok(out) if out.success()
            )
        })
    }

    /// netfilter rules are live as soon as they are inserted; reloading
    /// only makes them durable. A save failure is logged, not raised.
    fn reload(&self) -> PortFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.persist().await {
                tracing::warn!(
                    path = %self.settings.persist_path.display(),
                    error = %e,
                    "failed to persist netfilter rules"
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use std::sync::Mutex;

    use domain::common::entity::Protocol;
    use ports::test_utils::ScriptedRunner;

    /// In-memory rule table answering `-C`, `-A`, `-D` and the PREROUTING
    /// listing the way `iptables` does.
    #[derive(Default)]
    struct FakeIptables {
        rules: Mutex<Vec<String>>,
    }

    impl FakeIptables {
        fn rules(&self) -> Vec<String> {
            self.rules.lock().unwrap().clone()
        }

        fn listing(rules: &[String]) -> String {
            let mut out = String::from(
                "Chain PREROUTING (policy ACCEPT)\n\
                 num  target     prot opt source               destination\n",
            );
            let dnat = rules.iter().filter(|r| r.starts_with("nat PREROUTING "));
            for (n, rule) in dnat.enumerate() {
                let parts: Vec<&str> = rule.split_whitespace().collect();
                let after = |flag: &str| {
                    parts
                        .iter()
                        .position(|p| *p == flag)
                        .and_then(|i| parts.get(i + 1))
                        .copied()
                        .unwrap_or_default()
                };
                let proto = after("-p");
                out.push_str(&format!(
                    "{}    DNAT       {proto}  --  0.0.0.0/0            0.0.0.0/0            {proto} dpt:{} to:{}\n",
                    n + 1,
                    after("--dport"),
                    after("--to-destination"),
                ));
            }
            out
        }
    }

    impl CommandRunner for FakeIptables {
        fn run<'a>(&'a self, spec: &'a CommandSpec) -> PortFuture<'a, CommandOutput> {
            Box::pin(async move {
                if spec.program != IPTABLES {
                    return Ok(CommandOutput::ok(""));
                }
                let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
                let (table, rest) = match args.as_slice() {
                    ["-t", table, rest @ ..] => (*table, rest),
                    rest => ("filter", rest),
                };
                let mut rules = self.rules.lock().unwrap();
                let [op, chain, matches @ ..] = rest else {
                    return Ok(CommandOutput::failed(2, "bad invocation"));
                };
                if *op == "-L" {
                    return Ok(CommandOutput::ok(Self::listing(&rules)));
                }
                let key = format!("{table} {chain} {}", matches.join(" "));
                let position = rules.iter().position(|r| *r == key);
                let missing = CommandOutput::failed(
                    1,
                    "iptables: Bad rule (does a matching rule exist in that chain?).",
                );
                Ok(match (*op, position) {
                    ("-C", Some(_)) => CommandOutput::ok(""),
                    ("-A", _) => {
                        rules.push(key);
                        CommandOutput::ok("")
                    }
                    ("-D", Some(i)) => {
                        rules.remove(i);
                        CommandOutput::ok("")
                    }
                    _ => missing,
                })
            })
        }
    }

    fn stateful_backend() -> (NetfilterBackend, Arc<FakeIptables>) {
        let fake = Arc::new(FakeIptables::default());
        let settings = NetfilterSettings {
            public_interface: "eth0".to_string(),
            tunnel_interface: "wg0".to_string(),
            persist_path: PathBuf::from("/etc/iptables/rules.v4"),
        };
        (NetfilterBackend::new(settings, fake.clone()), fake)
    }

    fn ssh() -> PortMapping {
        PortMapping {
            protocol: Protocol::Tcp,
            public_port: 8022,
            peer_address: Ipv4Addr::new(10, 0, 0, 2),
            target_port: 22,
        }
    }

    fn backend() -> (NetfilterBackend, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner::new());
        let settings = NetfilterSettings {
            public_interface: "eth0".to_string(),
            tunnel_interface: "wg0".to_string(),
            persist_path: PathBuf::from("/etc/iptables/rules.v4"),
        };
        (NetfilterBackend::new(settings, runner.clone()), runner)
    }

    #[tokio::test]
    async fn apply_appends_three_rules_when_absent() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(1, "Bad rule"));

        nf.apply(&ssh()).await.unwrap();

        let appends: Vec<_> = runner
            .commands()
            .into_iter()
            .filter(|c| c.contains(" -A "))
            .collect();
        assert_eq!(
            appends,
            vec![
                "iptables -t nat -A PREROUTING -i eth0 -p tcp --dport 8022 -j DNAT --to-destination 10.0.0.2:22",
                "iptables -A FORWARD -i eth0 -o wg0 -p tcp -d 10.0.0.2 --dport 22 -m state --state NEW,ESTABLISHED,RELATED -j ACCEPT",
                "iptables -t nat -A POSTROUTING -o wg0 -p tcp -d 10.0.0.2 --dport 22 -j MASQUERADE",
            ]
        );
        assert!(runner.calls().iter().all(|c| c.privileged));
    }

    #[tokio::test]
    async fn apply_skips_present_rules() {
        let (nf, runner) = backend();
        // Every -C succeeds: all three rules already exist.
        nf.apply(&ssh()).await.unwrap();
        assert!(runner.commands().iter().all(|c| !c.contains(" -A ")));
    }

    #[tokio::test]
    async fn apply_failure_is_backend_error() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(1, ""));
        runner.respond(" -A ", CommandOutput::failed(2, "iptables: No chain/target/match by that name."));

        let err = nf.apply(&ssh()).await.unwrap_err();
        assert!(err.to_string().contains("No chain"), "got: {err}");
    }

    #[tokio::test]
    async fn retract_absent_rules_is_noop() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(1, "Bad rule"));

        nf.retract(&ssh()).await.unwrap();
        assert!(runner.commands().iter().all(|c| !c.contains(" -D ")));
    }

    #[tokio::test]
    async fn retract_deletes_with_insert_selectors() {
        let (nf, runner) = backend();

        nf.retract(&ssh()).await.unwrap();
        let deletes: Vec<_> = runner
            .commands()
            .into_iter()
            .filter(|c| c.contains(" -D "))
            .collect();
        assert_eq!(deletes.len(), 3);
        assert_eq!(
            deletes[0],
            "iptables -t nat -D PREROUTING -i eth0 -p tcp --dport 8022 -j DNAT --to-destination 10.0.0.2:22"
        );
    }

    #[tokio::test]
    async fn list_parses_dnat_rows() {
        let (nf, runner) = backend();
        runner.respond(
            "-L PREROUTING",
            CommandOutput::ok(
                "Chain PREROUTING (policy ACCEPT)\n\
                 num  target     prot opt source               destination\n\
                 1    DNAT       tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:8022 to:10.0.0.2:22\n",
            ),
        );
        assert_eq!(nf.list().await.unwrap(), vec![ssh()]);
    }

    #[tokio::test]
    async fn reload_saves_and_tees_rules() {
        let (nf, runner) = backend();
        runner.respond("iptables-save", CommandOutput::ok("*nat\nCOMMIT\n"));

        nf.reload().await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].display(), "tee /etc/iptables/rules.v4");
        assert_eq!(calls[1].stdin.as_deref(), Some("*nat\nCOMMIT\n"));
    }

    #[tokio::test]
    async fn reload_tolerates_save_failure() {
        let (nf, runner) = backend();
        runner.respond("iptables-save", CommandOutput::failed(1, "permission denied"));
        nf.reload().await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn configured_when_iptables_on_path() {
        let (nf, runner) = backend();
        assert!(nf.is_configured().await);
        runner.respond("which", CommandOutput::failed(1, ""));
        assert!(!nf.is_configured().await);
    }

    #[tokio::test]
    async fn retract_fails_when_check_is_denied() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(4, "Permission denied (you must be root)"));

        let err = nf.retract(&ssh()).await.unwrap_err();
        assert!(matches!(err, DomainError::Backend(_)));
        assert!(err.to_string().contains("-C PREROUTING"), "got: {err}");
        assert!(runner.commands().iter().all(|c| !c.contains(" -D ")));
    }

    #[tokio::test]
    async fn retract_fails_when_escalation_is_refused() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(1, "sudo: a password is required"));

        assert!(matches!(
            nf.retract(&ssh()).await,
            Err(DomainError::Backend(_))
        ));
        assert!(runner.commands().iter().all(|c| !c.contains(" -D ")));
    }

    #[tokio::test]
    async fn apply_fails_when_check_is_denied() {
        let (nf, runner) = backend();
        runner.respond(" -C ", CommandOutput::failed(4, "Permission denied (you must be root)"));

        assert!(matches!(nf.apply(&ssh()).await, Err(DomainError::Backend(_))));
        assert!(runner.commands().iter().all(|c| !c.contains(" -A ")));
    }

    #[tokio::test]
    async fn retract_delete_failure_is_backend_error() {
        let (nf, runner) = backend();
        runner.respond(" -D ", CommandOutput::failed(2, "iptables: Index of deletion too big."));

        assert!(matches!(
            nf.retract(&ssh()).await,
            Err(DomainError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn retract_keeps_peer_rules_shared_with_another_forward() {
        let (nf, fake) = stateful_backend();
        let alt = PortMapping {
            public_port: 2222,
            ..ssh()
        };

        nf.apply(&ssh()).await.unwrap();
        nf.apply(&alt).await.unwrap();
        assert_eq!(fake.rules().len(), 4);

        nf.retract(&ssh()).await.unwrap();
        for selector in nf.selectors(&alt) {
            assert!(nf.exists(&selector).await.unwrap(), "{} lost", selector.chain);
        }
        assert_eq!(nf.list().await.unwrap(), vec![alt]);

        nf.retract(&alt).await.unwrap();
        assert!(fake.rules().is_empty());
    }

    #[tokio::test]
    async fn retract_twice_with_live_table_is_harmless() {
        let (nf, fake) = stateful_backend();
        nf.apply(&ssh()).await.unwrap();
        nf.apply(&ssh()).await.unwrap();
        assert_eq!(fake.rules().len(), 3);

        nf.retract(&ssh()).await.unwrap();
        nf.retract(&ssh()).await.unwrap();
        assert!(fake.rules().is_empty());
    }
}
