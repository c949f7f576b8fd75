//! Program and verb tables for the command classifier.
//!
//! Everything here works on one simple command's argv after quote removal.
//! Nested shell source (`sh -c '...'`) is handed back to the caller as
//! [`Verdict::Script`] so the tree walk can parse it with its depth limit.

use crate::approval::report::Severity;

/// Outcome of looking at one argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Leaf {
        program: Option<String>,
        severity: Severity,
        rationale: String,
    },
    /// Inline script passed to a shell; classify `source` and take at least `floor`
    Script {
        program: String,
        source: String,
        floor: Severity,
    },
    /// Keyword-only command such as `done` or `}`
    NoOp,
}

impl Verdict {
    fn leaf(program: &str, severity: Severity, rationale: impl Into<String>) -> Self {
        Verdict::Leaf {
            program: Some(program.to_string()),
            severity,
            rationale: rationale.into(),
        }
    }
}

const KUBECTL_READ_VERBS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "explain",
    "version",
    "api-resources",
    "api-versions",
    "cluster-info",
    "diff",
    "events",
    "wait",
    "completion",
    "kustomize",
    "plugin",
];

const KUBECTL_WRITE_VERBS: &[&str] = &[
    "apply",
    "create",
    "patch",
    "edit",
    "scale",
    "autoscale",
    "rollout",
    "label",
    "annotate",
    "set",
    "replace",
    "expose",
    "run",
    "cp",
    "uncordon",
    "certificate",
    "auth",
    "config",
];

const KUBECTL_DANGEROUS_VERBS: &[&str] = &["delete", "drain", "cordon", "taint"];

const KUBECTL_INTERACTIVE_VERBS: &[&str] = &["exec", "attach", "port-forward", "proxy", "debug"];

/// Global flags that consume the following argument.
const KUBECTL_VALUE_FLAGS: &[&str] = &[
    "-n",
    "--namespace",
    "--context",
    "--cluster",
    "--user",
    "--kubeconfig",
    "-s",
    "--server",
    "--token",
    "--as",
    "--as-group",
    "--as-uid",
    "--request-timeout",
    "--certificate-authority",
    "--client-certificate",
    "--client-key",
    "--tls-server-name",
    "--cache-dir",
    "-v",
    "--v",
    "--log-file",
    "--profile",
    "--profile-output",
];

/// Flags that widen a mutating verb's blast radius.
const KUBECTL_WIDE_FLAGS: &[&str] = &[
    "--all",
    "-all",
    "--all-namespaces",
    "-A",
    "--cascade=orphan",
    "--now",
];

const KUBECTL_INTERACTIVE_FLAGS: &[&str] = &[
    "-it",
    "-ti",
    "-i",
    "-t",
    "--tty",
    "--tty=true",
    "--stdin",
    "--stdin=true",
];

const HELM_READ_VERBS: &[&str] = &[
    "list", "ls", "status", "get", "show", "inspect", "search", "repo", "history", "hist",
    "template", "version", "env", "lint", "verify", "dependency", "help", "completion",
];

const HELM_DANGEROUS_VERBS: &[&str] = &["uninstall", "delete", "del", "un"];

const DANGEROUS_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "shred", "dd", "truncate", "unlink", "kill", "pkill", "killall", "reboot",
    "shutdown", "halt", "poweroff", "fdisk", "parted", "wipefs", "crontab", "iptables",
];

const WRITE_PROGRAMS: &[&str] = &[
    "mv", "cp", "chmod", "chown", "chgrp", "mkdir", "touch", "ln", "tee", "patch", "install",
    "rsync", "tar", "unzip", "gzip", "gunzip", "systemctl", "apt", "apt-get", "yum", "dnf", "pip",
    "npm", "kubeadm",
];

const READ_PROGRAMS: &[&str] = &[
    "cat", "grep", "egrep", "fgrep", "rg", "head", "tail", "ls", "wc", "sort", "uniq", "jq", "yq",
    "cut", "tr", "echo", "printf", "base64", "date", "pwd", "whoami", "id", "hostname", "uname",
    "env", "printenv", "which", "type", "stat", "file", "du", "df", "ps", "free", "uptime",
    "column", "nl", "diff", "cmp", "comm", "md5sum", "sha256sum", "true", "false", "test", "[",
    "seq", "basename", "dirname", "realpath", "readlink", "tac", "rev", "fold", "fmt", "expr",
    "sleep", "dig", "nslookup", "host", "ping", "getent", "kubectx", "kubens", "stern", "cd",
    "pushd", "popd", "export",
];

const INTERACTIVE_PROGRAMS: &[&str] = &[
    "less", "more", "vi", "vim", "nvim", "nano", "emacs", "top", "htop", "ssh", "telnet", "k9s",
    "tmux", "screen", "python", "python3", "node", "irb",
];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "ash"];

/// Classify one argv. `argv[0]` may carry a path prefix.
pub(crate) fn classify_argv(argv: &[String]) -> Verdict {
    let args: Vec<&str> = argv.iter().map(String::as_str).collect();
    classify_args(&args, Severity::Read, Vec::new())
}

fn classify_args<'a>(args: &[&'a str], floor: Severity, mut wrappers: Vec<&'a str>) -> Verdict {
    let mut i = 0;
    let mut floor = floor;

    // Strip keywords and wrappers until the real program is reached.
    loop {
        let Some(&word) = args.get(i) else {
            return if wrappers.is_empty() {
                Verdict::NoOp
            } else {
                let last = wrappers.last().copied().unwrap_or("wrapper");
                if wrappers.iter().any(|w| matches!(*w, "sudo" | "doas")) {
                    // sudo -i / -s and bare doas -s start a root shell
                    Verdict::leaf(
                        last,
                        Severity::Interactive.max(floor),
                        format!("'{}' with no command opens a shell", last),
                    )
                } else {
                    Verdict::leaf(
                        last,
                        Severity::Unknown.max(floor),
                        format!("'{}' with no command", last),
                    )
                }
            };
        };
        let name = program_name(word);
        match name {
            "!" | "{" | "}" | "if" | "then" | "else" | "elif" | "fi" | "do" | "done" | "while"
            | "until" | "esac" => i += 1,
            "for" | "select" => {
                return Verdict::leaf(name, Severity::Read.max(floor), "loop header");
            }
            "case" | "function" => {
                return Verdict::leaf(
                    name,
                    Severity::Unknown.max(floor),
                    format!("'{}' blocks are not analysed", name),
                );
            }
            "sudo" | "doas" => {
                wrappers.push(name);
                i = skip_flags(args, i + 1, &["-u", "-g", "-p", "-C", "-D", "-r", "-t", "-U", "-h"]);
            }
            "env" if args.len() > i + 1 => {
                wrappers.push(name);
                i = skip_flags(args, i + 1, &["-u", "--unset", "-C", "--chdir", "-S"]);
                while args.get(i).is_some_and(|a| is_assignment(a)) {
                    i += 1;
                }
            }
            "time" | "nohup" | "stdbuf" | "ionice" => {
                wrappers.push(name);
                i = skip_flags(args, i + 1, &["-o", "-i", "-e", "-c", "-n"]);
            }
            "nice" => {
                wrappers.push(name);
                i = skip_flags(args, i + 1, &["-n", "--adjustment"]);
            }
            "timeout" => {
                wrappers.push(name);
                i = skip_flags(args, i + 1, &["-s", "--signal", "-k", "--kill-after"]);
                // Duration
                i += 1;
            }
            "watch" => {
                wrappers.push(name);
                floor = floor.max(Severity::Interactive);
                i = skip_flags(args, i + 1, &["-n", "--interval"]);
            }
            "xargs" => {
                wrappers.push(name);
                i = skip_flags(
                    args,
                    i + 1,
                    &[
                        "-n", "-I", "-P", "-L", "-d", "-E", "-s", "-a", "--max-args", "--max-procs",
                        "--delimiter", "--arg-file",
                    ],
                );
                if i >= args.len() {
                    // xargs with no command runs echo
                    return Verdict::leaf("xargs", Severity::Read.max(floor), "xargs defaults to echo");
                }
            }
            "command" | "builtin" | "exec" => {
                if args.get(i + 1).is_some_and(|a| *a == "-v" || *a == "-V") {
                    return Verdict::leaf(name, Severity::Read.max(floor), "command lookup");
                }
                wrappers.push(name);
                i = skip_flags(args, i + 1, &[]);
            }
            _ => break,
        }
    }

    let program = program_name(args[i]);
    let rest = &args[i + 1..];
    let mut verdict = classify_program(program, rest, floor, &wrappers);

    // Any --force anywhere is dangerous regardless of program.
    if rest.iter().any(|a| is_force_flag(a)) {
        if let Verdict::Leaf { severity, rationale, .. } = &mut verdict {
            if *severity < Severity::Dangerous {
                *severity = Severity::Dangerous;
                *rationale = format!("{}; --force flag", rationale);
            }
        }
    }
    verdict
}

fn classify_program(program: &str, rest: &[&str], floor: Severity, wrappers: &[&str]) -> Verdict {
    let prefix = if wrappers.is_empty() {
        String::new()
    } else {
        format!("via {}: ", wrappers.join(" "))
    };
    let leaf = |severity: Severity, rationale: String| {
        Verdict::leaf(program, severity.max(floor), format!("{}{}", prefix, rationale))
    };

    match program {
        "kubectl" | "oc" | "kubecolor" => {
            let (severity, rationale) = kubectl(program, rest);
            leaf(severity, rationale)
        }
        "helm" => {
            let (severity, rationale) = helm(rest);
            leaf(severity, rationale)
        }
        p if SHELLS.contains(&p) => shell(p, rest, floor, &prefix),
        "find" => {
            if rest.contains(&"-delete") {
                return leaf(Severity::Dangerous, "find -delete removes files".to_string());
            }
            let exec_at = rest
                .iter()
                .position(|a| matches!(*a, "-exec" | "-execdir" | "-ok" | "-okdir"));
            match exec_at {
                Some(pos) => {
                    let inner: Vec<&str> = rest[pos + 1..]
                        .iter()
                        .copied()
                        .take_while(|a| *a != ";" && *a != "+")
                        .collect();
                    let mut wrapped = wrappers.to_vec();
                    wrapped.push("find -exec");
                    classify_args(&inner, floor, wrapped)
                }
                None => leaf(Severity::Read, "find without actions".to_string()),
            }
        }
        "sed" => {
            if rest
                .iter()
                .any(|a| a.starts_with("--in-place") || (a.starts_with("-i") && !a.starts_with("--")))
            {
                leaf(Severity::Write, "sed edits files in place".to_string())
            } else {
                leaf(Severity::Read, "sed stream filter".to_string())
            }
        }
        "awk" | "gawk" | "mawk" => {
            if rest.iter().any(|a| a.contains("system(") || a.contains("| getline")) {
                leaf(Severity::Unknown, "awk program runs external commands".to_string())
            } else {
                leaf(Severity::Read, "awk text processing".to_string())
            }
        }
        "curl" | "wget" => leaf(
            Severity::Unknown,
            format!("'{}' performs network requests with unknown effect", program),
        ),
        "eval" | "source" | "." => leaf(
            Severity::Unknown,
            format!("'{}' runs code that cannot be inspected", program),
        ),
        p if p.starts_with("mkfs") || DANGEROUS_PROGRAMS.contains(&p) => {
            leaf(Severity::Dangerous, format!("'{}' is destructive", p))
        }
        p if WRITE_PROGRAMS.contains(&p) => {
            leaf(Severity::Write, format!("'{}' modifies state", p))
        }
        p if INTERACTIVE_PROGRAMS.contains(&p) => {
            leaf(Severity::Interactive, format!("'{}' needs a terminal", p))
        }
        p if READ_PROGRAMS.contains(&p) => {
            leaf(Severity::Read, format!("'{}' is read-only", p))
        }
        p => leaf(Severity::Unknown, format!("unrecognised program '{}'", p)),
    }
}

fn shell(program: &str, rest: &[&str], floor: Severity, prefix: &str) -> Verdict {
    let mut i = 0;
    while let Some(arg) = rest.get(i) {
        if *arg == "-c" || (arg.starts_with('-') && !arg.starts_with("--") && arg.contains('c')) {
            return match rest.get(i + 1) {
                Some(source) => Verdict::Script {
                    program: program.to_string(),
                    source: (*source).to_string(),
                    floor,
                },
                None => Verdict::leaf(
                    program,
                    Severity::Unknown.max(floor),
                    format!("{}'{} -c' without a script", prefix, program),
                ),
            };
        }
        if !arg.starts_with('-') {
            return Verdict::leaf(
                program,
                Severity::Unknown.max(floor),
                format!("{}'{}' runs script file '{}'", prefix, program, arg),
            );
        }
        i += 1;
    }
    Verdict::leaf(
        program,
        Severity::Interactive.max(floor),
        format!("{}interactive '{}' session", prefix, program),
    )
}

fn kubectl(program: &str, rest: &[&str]) -> (Severity, String) {
    let mut i = skip_flags(rest, 0, KUBECTL_VALUE_FLAGS);
    let Some(verb) = rest.get(i).copied() else {
        return (Severity::Read, format!("'{}' with no verb prints help", program));
    };
    i += 1;
    let sub = rest.get(i).copied().filter(|s| !s.starts_with('-'));
    let flags = &rest[i..];
    let has = |set: &[&str]| flags.iter().any(|f| set.contains(f));

    let (mut severity, mut rationale) = if KUBECTL_DANGEROUS_VERBS.contains(&verb) {
        (Severity::Dangerous, format!("{} {} is destructive", program, verb))
    } else if KUBECTL_INTERACTIVE_VERBS.contains(&verb) {
        (Severity::Interactive, format!("{} {} attaches a stream", program, verb))
    } else if KUBECTL_READ_VERBS.contains(&verb) {
        (Severity::Read, format!("{} {} is read-only", program, verb))
    } else if KUBECTL_WRITE_VERBS.contains(&verb) {
        match (verb, sub) {
            ("auth", Some("can-i" | "whoami"))
            | ("config", Some("view" | "get-contexts" | "current-context" | "get-clusters" | "get-users"))
            | ("rollout", Some("status" | "history")) => (
                Severity::Read,
                format!("{} {} {} is read-only", program, verb, sub.unwrap_or_default()),
            ),
            _ => (Severity::Write, format!("{} {} mutates resources", program, verb)),
        }
    } else {
        (Severity::Unknown, format!("unrecognised {} verb '{}'", program, verb))
    };

    if severity != Severity::Read && severity < Severity::Dangerous && has(KUBECTL_WIDE_FLAGS) {
        severity = Severity::Dangerous;
        rationale.push_str("; applies to all resources");
    }
    if verb == "delete" && matches!(sub, Some("namespace" | "namespaces" | "ns")) {
        rationale.push_str("; deleting a namespace removes everything in it");
    }
    if flags
        .windows(2)
        .any(|w| w[0] == "--grace-period" && w[1] == "0")
        || flags.contains(&"--grace-period=0")
    {
        severity = Severity::Dangerous;
        rationale.push_str("; skips graceful termination");
    }

    let streams = match verb {
        "logs" => has(&["-f", "--follow", "--follow=true"]),
        "get" | "events" | "wait" => has(&["-w", "--watch", "--watch=true", "--watch-only"]),
        "run" | "debug" => has(KUBECTL_INTERACTIVE_FLAGS),
        _ => false,
    };
    if streams && severity < Severity::Interactive {
        severity = Severity::Interactive;
        rationale.push_str("; streams until interrupted");
    }
    (severity, rationale)
}

fn helm(rest: &[&str]) -> (Severity, String) {
    let i = skip_flags(
        rest,
        0,
        &["-n", "--namespace", "--kube-context", "--kubeconfig", "--registry-config", "--repository-config"],
    );
    let Some(verb) = rest.get(i).copied() else {
        return (Severity::Read, "'helm' with no verb prints help".to_string());
    };
    if HELM_DANGEROUS_VERBS.contains(&verb) {
        (Severity::Dangerous, format!("helm {} removes a release", verb))
    } else if HELM_READ_VERBS.contains(&verb) {
        let subverb = rest.get(i + 1).copied();
        let mutating_repo =
            verb == "repo" && matches!(subverb, Some("add" | "remove" | "rm" | "update"));
        let mutating_dependency =
            verb == "dependency" && matches!(subverb, Some("update" | "up" | "build"));
        if mutating_repo {
            (Severity::Write, "helm repo changes local repository config".to_string())
        } else if mutating_dependency {
            (Severity::Write, "helm dependency writes into charts/".to_string())
        } else {
            (Severity::Read, format!("helm {} is read-only", verb))
        }
    } else {
        (Severity::Write, format!("helm {} changes releases", verb))
    }
}

/// Skip leading flags starting at `start`. Flags in `value_flags` also skip
/// their argument unless written as `--flag=value`. Stops at `--`.
fn skip_flags(args: &[&str], start: usize, value_flags: &[&str]) -> usize {
    let mut i = start;
    while let Some(arg) = args.get(i) {
        if *arg == "--" {
            return i + 1;
        }
        if !arg.starts_with('-') || *arg == "-" {
            break;
        }
        i += 1;
        if value_flags.contains(arg) {
            i += 1;
        }
    }
    i
}

fn is_force_flag(arg: &str) -> bool {
    arg == "--force" || (arg.starts_with("--force=") && arg != "--force=false")
}

fn is_assignment(arg: &str) -> bool {
    match arg.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Basename of a program path: `/usr/bin/kubectl` -> `kubectl`.
fn program_name(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn severity_of(command: &[&str]) -> Severity {
        let argv: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        match classify_argv(&argv) {
            Verdict::Leaf { severity, .. } => severity,
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_kubectl_read_verbs() {
        for verb in ["get", "describe", "logs", "top", "explain", "version"] {
            assert_eq!(severity_of(&["kubectl", verb, "pods"]), Severity::Read, "{verb}");
        }
    }

    #[test]
    fn test_kubectl_write_verbs() {
        for verb in ["apply", "create", "patch", "edit", "scale", "label"] {
            assert_eq!(severity_of(&["kubectl", verb, "x"]), Severity::Write, "{verb}");
        }
        assert_eq!(severity_of(&["kubectl", "rollout", "restart", "deploy/web"]), Severity::Write);
    }

    #[test]
    fn test_kubectl_read_subverbs() {
        assert_eq!(severity_of(&["kubectl", "rollout", "status", "deploy/web"]), Severity::Read);
        assert_eq!(severity_of(&["kubectl", "auth", "can-i", "get", "pods"]), Severity::Read);
        assert_eq!(severity_of(&["kubectl", "config", "view"]), Severity::Read);
        assert_eq!(severity_of(&["kubectl", "config", "use-context", "prod"]), Severity::Write);
    }

    #[test]
    fn test_kubectl_dangerous() {
        assert_eq!(severity_of(&["kubectl", "delete", "namespace", "prod"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "drain", "node-1"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "cordon", "node-1"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "taint", "nodes", "n1", "k=v:NoSchedule"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "apply", "-f", "x.yaml", "--force"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "label", "pods", "--all", "a=b"]), Severity::Dangerous);
        assert_eq!(
            severity_of(&["kubectl", "replace", "-f", "x.yaml", "--grace-period", "0"]),
            Severity::Dangerous
        );
    }

    #[test]
    fn test_kubectl_all_namespaces_on_read_is_read() {
        assert_eq!(severity_of(&["kubectl", "get", "pods", "-A"]), Severity::Read);
    }

    #[test]
    fn test_kubectl_interactive() {
        assert_eq!(severity_of(&["kubectl", "exec", "-it", "web", "--", "sh"]), Severity::Interactive);
        assert_eq!(severity_of(&["kubectl", "port-forward", "svc/web", "8080:80"]), Severity::Interactive);
        assert_eq!(severity_of(&["kubectl", "logs", "-f", "web"]), Severity::Interactive);
        assert_eq!(severity_of(&["kubectl", "get", "pods", "-w"]), Severity::Interactive);
        assert_eq!(severity_of(&["kubectl", "run", "-it", "tmp", "--image=busybox"]), Severity::Interactive);
    }

    #[test]
    fn test_kubectl_global_flags_before_verb() {
        assert_eq!(
            severity_of(&["kubectl", "--context", "prod", "-n", "kube-system", "delete", "pod", "x"]),
            Severity::Dangerous
        );
        assert_eq!(severity_of(&["/usr/local/bin/kubectl", "get", "ns"]), Severity::Read);
        assert_eq!(severity_of(&["oc", "get", "routes"]), Severity::Read);
    }

    #[test]
    fn test_kubectl_unknown_verb() {
        assert_eq!(severity_of(&["kubectl", "frobnicate"]), Severity::Unknown);
    }

    #[test]
    fn test_helm() {
        assert_eq!(severity_of(&["helm", "list", "-A"]), Severity::Read);
        assert_eq!(severity_of(&["helm", "upgrade", "web", "chart/"]), Severity::Write);
        assert_eq!(severity_of(&["helm", "uninstall", "web"]), Severity::Dangerous);
        assert_eq!(severity_of(&["helm", "repo", "add", "x", "https://x"]), Severity::Write);
        assert_eq!(severity_of(&["helm", "repo", "list"]), Severity::Read);
        assert_eq!(severity_of(&["helm", "dependency", "list", "chart/"]), Severity::Read);
        assert_eq!(severity_of(&["helm", "dependency", "update", "chart/"]), Severity::Write);
        assert_eq!(severity_of(&["helm", "dependency", "build", "chart/"]), Severity::Write);
    }

    #[test]
    fn test_filesystem_programs() {
        assert_eq!(severity_of(&["rm", "-rf", "/tmp/x"]), Severity::Dangerous);
        assert_eq!(severity_of(&["mkfs.ext4", "/dev/sda1"]), Severity::Dangerous);
        assert_eq!(severity_of(&["mv", "a", "b"]), Severity::Write);
        assert_eq!(severity_of(&["sed", "-i", "s/a/b/", "f"]), Severity::Write);
        assert_eq!(severity_of(&["sed", "s/a/b/"]), Severity::Read);
        assert_eq!(severity_of(&["grep", "-r", "x", "."]), Severity::Read);
        assert_eq!(severity_of(&["less", "f"]), Severity::Interactive);
    }

    #[test]
    fn test_find_actions() {
        assert_eq!(severity_of(&["find", ".", "-name", "*.log"]), Severity::Read);
        assert_eq!(severity_of(&["find", ".", "-delete"]), Severity::Dangerous);
        assert_eq!(severity_of(&["find", ".", "-exec", "rm", "{}", ";"]), Severity::Dangerous);
        assert_eq!(severity_of(&["find", ".", "-exec", "cat", "{}", "+"]), Severity::Read);
    }

    #[test]
    fn test_wrappers_are_stripped() {
        assert_eq!(severity_of(&["sudo", "-u", "root", "rm", "x"]), Severity::Dangerous);
        assert_eq!(severity_of(&["env", "A=1", "kubectl", "get", "pods"]), Severity::Read);
        assert_eq!(severity_of(&["timeout", "-s", "KILL", "10", "kubectl", "apply", "-f", "x"]), Severity::Write);
        assert_eq!(severity_of(&["xargs", "-n", "1", "kubectl", "delete", "pod"]), Severity::Dangerous);
        assert_eq!(severity_of(&["nohup", "ls"]), Severity::Read);
        assert_eq!(severity_of(&["xargs"]), Severity::Read);
    }

    #[test]
    fn test_wrapper_without_command_is_never_read() {
        assert_eq!(severity_of(&["sudo", "-i"]), Severity::Interactive);
        assert_eq!(severity_of(&["sudo", "-s"]), Severity::Interactive);
        assert_eq!(severity_of(&["sudo"]), Severity::Interactive);
        assert_eq!(severity_of(&["doas", "-s"]), Severity::Interactive);
        assert_eq!(severity_of(&["exec"]), Severity::Unknown);
        assert_eq!(severity_of(&["nohup"]), Severity::Unknown);
    }

    #[test]
    fn test_watch_floor_is_interactive() {
        assert_eq!(severity_of(&["watch", "-n", "2", "kubectl", "get", "pods"]), Severity::Interactive);
        assert_eq!(severity_of(&["watch", "kubectl", "delete", "pod", "x"]), Severity::Dangerous);
    }

    #[test]
    fn test_network_and_eval_are_unknown() {
        assert_eq!(severity_of(&["curl", "https://example.com"]), Severity::Unknown);
        assert_eq!(severity_of(&["eval", "$X"]), Severity::Unknown);
        assert_eq!(severity_of(&["frobnicate"]), Severity::Unknown);
    }

    #[test]
    fn test_force_flag_is_dangerous_anywhere() {
        assert_eq!(severity_of(&["git", "push", "--force"]), Severity::Dangerous);
        assert_eq!(severity_of(&["helm", "upgrade", "web", "c", "--force"]), Severity::Dangerous);
        assert_eq!(severity_of(&["kubectl", "get", "pods", "--force=false"]), Severity::Read);
    }

    #[test]
    fn test_shell_script_is_returned_for_recursion() {
        let argv: Vec<String> = ["bash", "-c", "kubectl delete ns x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match classify_argv(&argv) {
            Verdict::Script { program, source, floor } => {
                assert_eq!(program, "bash");
                assert_eq!(source, "kubectl delete ns x");
                assert_eq!(floor, Severity::Read);
            }
            other => panic!("expected script, got {:?}", other),
        }
        assert_eq!(severity_of(&["bash"]), Severity::Interactive);
        assert_eq!(severity_of(&["sh", "deploy.sh"]), Severity::Unknown);
    }

    #[test]
    fn test_keywords() {
        let argv = vec!["done".to_string()];
        assert_eq!(classify_argv(&argv), Verdict::NoOp);
        assert_eq!(severity_of(&["if", "kubectl", "get", "ns", "x"]), Severity::Read);
        assert_eq!(severity_of(&["for", "p", "in", "a", "b"]), Severity::Read);
        assert_eq!(severity_of(&["case", "$x", "in"]), Severity::Unknown);
    }
}
