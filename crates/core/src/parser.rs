//! Turns raw script strings into runnable command trees.
//!
//! This is deliberately not a shell: commands are split on whitespace with
//! single/double-quote awareness, `;`, `&&` and `||` become structural
//! separators, and leading `VAR=value` words become environment captures.
//! A word naming one of the package's scripts expands into a script group
//! (with its `pre`/`post` companions); a word resolving inside an ancestor
//! `node_modules/.bin` becomes a binary invocation; anything else is left to
//! the operating system's `PATH`.

use std::collections::BTreeMap;

use crate::command::{CommandNode, GroupSpec, NodeKind, OpKind, ProcessSpec};
use crate::platform::BinShim;
use crate::workspace::Package;

/// Package-manager invocations that forward to a script or binary
const RUN_HOOKS: [&[&str]; 6] = [
    &["yarn", "run"],
    &["npm", "run"],
    &["pnpm", "run"],
    &["npx"],
    &["pnpx"],
    &["yarn"],
];

/// Builds command trees for a single package
pub struct CommandParser<'a> {
    pkg: &'a Package,
}

impl<'a> CommandParser<'a> {
    pub fn new(pkg: &'a Package) -> CommandParser<'a> {
        CommandParser { pkg }
    }

    /// Parse a raw command line into a group node
    pub fn parse(&self, cmd: &str) -> CommandNode {
        self.group_with(cmd, &mut Vec::new())
    }

    /// Expand the named script into its group node, appending `extra`
    /// arguments to the script body
    pub fn script_node(&self, name: &str, extra: &[String]) -> CommandNode {
        self.script_with(name, extra, &mut Vec::new())
    }

    fn group_with(&self, body: &str, active: &mut Vec<String>) -> CommandNode {
        let words = split_op_suffix(split_words(body));
        let mut children = Vec::new();
        let mut current: Vec<String> = Vec::new();
        for word in words {
            match OpKind::parse(&word) {
                Some(op) => {
                    if !current.is_empty() {
                        children.push(self.command_with(std::mem::take(&mut current), active));
                    }
                    children.push(CommandNode::op(op));
                }
                None => current.push(word),
            }
        }
        if !current.is_empty() {
            children.push(self.command_with(current, active));
        }

        let mut node = CommandNode::group(
            body.trim(),
            GroupSpec {
                children,
                ..GroupSpec::default()
            },
        );
        node.package = Some(self.pkg.name.clone());
        node.cwd = Some(self.pkg.root.clone());
        node
    }

    fn command_with(&self, args: Vec<String>, active: &mut Vec<String>) -> CommandNode {
        let mut env = BTreeMap::new();
        let mut iter = args.into_iter().peekable();
        loop {
            let assignment = match iter.peek() {
                Some(word) => parse_env_assignment(word),
                None => None,
            };
            match assignment {
                Some((key, value)) => {
                    env.insert(key, value);
                    iter.next();
                }
                None => break,
            }
        }
        let args: Vec<String> = iter.collect();

        if args.is_empty() {
            let mut node = CommandNode::process(
                "",
                ProcessSpec {
                    env,
                    ..ProcessSpec::default()
                },
            );
            node.package = Some(self.pkg.name.clone());
            node.cwd = Some(self.pkg.root.clone());
            return node;
        }

        if let Some(rest) = self.strip_hook(&args) {
            let mut node = self.command_with(rest, active);
            merge_env(&mut node, &env);
            return node;
        }

        let name = args[0].clone();
        if self.pkg.has_script(&name) && !active.iter().any(|script| script == &name) {
            let mut node = self.script_with(&name, &args[1..], active);
            merge_env(&mut node, &env);
            return node;
        }

        let bin = self.resolve_bin(&name);
        let mut node = CommandNode::process(name, ProcessSpec { argv: args, env, bin });
        node.package = Some(self.pkg.name.clone());
        node.cwd = Some(self.pkg.root.clone());
        node
    }

    fn script_with(&self, name: &str, extra: &[String], active: &mut Vec<String>) -> CommandNode {
        active.push(name.to_string());

        let mut body = self.pkg.scripts.get(name).cloned().unwrap_or_default();
        if !extra.is_empty() {
            body.push(' ');
            body.push_str(&extra.join(" "));
        }
        let mut children = match self.group_with(&body, active).kind {
            NodeKind::Group(group) => group.children,
            _ => Vec::new(),
        };

        let pre = format!("pre{}", name);
        if self.pkg.has_script(&pre) {
            children.insert(0, self.script_with(&pre, &[], active));
        }
        let post = format!("post{}", name);
        if self.pkg.has_script(&post) {
            children.push(self.script_with(&post, &[], active));
        }

        active.pop();

        let mut node = CommandNode::group(
            name,
            GroupSpec {
                children,
                concurrent: self.pkg.concurrent_scripts.iter().any(|s| s == name),
                script: true,
            },
        );
        node.package = Some(self.pkg.name.clone());
        node.cwd = Some(self.pkg.root.clone());
        node
    }

    /// Strip `yarn run` / `npm run` / `npx` style prefixes so the forwarded
    /// target is classified on its own
    fn strip_hook(&self, args: &[String]) -> Option<Vec<String>> {
        for hook in RUN_HOOKS {
            if args.len() <= hook.len() {
                continue;
            }
            if !args.iter().zip(hook.iter()).all(|(arg, word)| arg == word) {
                continue;
            }
            let rest = args[hook.len()..].to_vec();
            // bare `yarn <x>` only forwards to known scripts; the run forms
            // and the npx runners always re-classify
            if hook.len() == 2
                || hook[0] == "npx"
                || hook[0] == "pnpx"
                || self.pkg.has_script(&rest[0])
            {
                return Some(rest);
            }
        }
        None
    }

    /// Probe ancestor `node_modules/.bin` directories for a workspace binary
    fn resolve_bin(&self, name: &str) -> Option<std::path::PathBuf> {
        let shim = BinShim::current(name);
        let mut dir = Some(self.pkg.root.as_path());
        while let Some(current) = dir {
            let bin_dir = current.join("node_modules").join(".bin");
            for candidate in &shim.candidates {
                let path = bin_dir.join(candidate);
                if path.exists() {
                    return Some(path);
                }
            }
            dir = current.parent();
        }
        None
    }
}

/// Whitespace split with single/double-quote awareness; quotes are stripped
pub(crate) fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(open) => {
                if ch == open {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Detach a separator glued to the end of a word, e.g. `lint;` -> `lint` `;`
fn split_op_suffix(words: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for word in words {
        let mut handled = false;
        for op in ["&&", "||", ";"] {
            if word.len() > op.len() {
                if let Some(head) = word.strip_suffix(op) {
                    out.push(head.to_string());
                    out.push(op.to_string());
                    handled = true;
                    break;
                }
            }
        }
        if !handled {
            out.push(word);
        }
    }
    out
}

/// `VAR=value` at the front of a command, `VAR` limited to `[A-Za-z0-9_-]`
fn parse_env_assignment(word: &str) -> Option<(String, String)> {
    let (key, value) = word.split_once('=')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    if key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Some((key.to_string(), value.to_string()))
    } else {
        None
    }
}

fn merge_env(node: &mut CommandNode, env: &BTreeMap<String, String>) {
    match &mut node.kind {
        NodeKind::Process(spec) => {
            for (key, value) in env {
                spec.env
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        NodeKind::Group(group) => {
            for child in &mut group.children {
                merge_env(child, env);
            }
        }
        NodeKind::Op(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn demo_pkg(scripts: &[(&str, &str)]) -> Package {
        Package {
            name: "demo".to_string(),
            root: PathBuf::from("/ws/demo"),
            scripts: scripts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dependencies: BTreeMap::new(),
            dev_dependencies: BTreeMap::new(),
            concurrent_scripts: Vec::new(),
        }
    }

    fn argv(node: &CommandNode) -> Vec<&str> {
        match &node.kind {
            NodeKind::Process(spec) => spec.argv.iter().map(String::as_str).collect(),
            _ => panic!("expected a process node, got {:?}", node.kind),
        }
    }

    #[test]
    fn test_ops_split_commands_even_when_glued() {
        let pkg = demo_pkg(&[]);
        let tree = CommandParser::new(&pkg).parse("echo a; echo b && echo c");

        let children = tree.children();
        assert_eq!(children.len(), 5);
        assert_eq!(argv(&children[0]), vec!["echo", "a"]);
        assert!(matches!(children[1].kind, NodeKind::Op(OpKind::Seq)));
        assert_eq!(argv(&children[2]), vec!["echo", "b"]);
        assert!(matches!(children[3].kind, NodeKind::Op(OpKind::And)));
        assert_eq!(argv(&children[4]), vec!["echo", "c"]);
    }

    #[test]
    fn test_quoted_words_keep_their_spaces() {
        let pkg = demo_pkg(&[]);
        let tree = CommandParser::new(&pkg).parse(r#"echo "hello world" 'a b'"#);

        assert_eq!(argv(&tree.children()[0]), vec!["echo", "hello world", "a b"]);
    }

    #[test]
    fn test_leading_assignments_become_env_captures() {
        let pkg = demo_pkg(&[]);
        let tree = CommandParser::new(&pkg).parse("NODE_ENV=production webpack --mode production");

        let child = &tree.children()[0];
        match &child.kind {
            NodeKind::Process(spec) => {
                assert_eq!(spec.env.get("NODE_ENV").map(String::as_str), Some("production"));
                assert_eq!(spec.argv[0], "webpack");
            }
            other => panic!("expected process, got {:?}", other),
        }

        // assignments after the command name stay plain arguments
        let tree = CommandParser::new(&pkg).parse("echo FOO=bar");
        assert_eq!(argv(&tree.children()[0]), vec!["echo", "FOO=bar"]);
    }

    #[test]
    fn test_script_names_expand_with_pre_and_post() {
        let pkg = demo_pkg(&[
            ("build", "tsc"),
            ("prebuild", "echo before"),
            ("postbuild", "echo after"),
        ]);
        let tree = CommandParser::new(&pkg).parse("build");

        let script = &tree.children()[0];
        assert!(script.is_script_group());
        assert_eq!(script.name, "build");

        let children = script.children();
        assert_eq!(children.len(), 3);
        assert!(children[0].is_pre_script());
        assert_eq!(argv(&children[1]), vec!["tsc"]);
        assert!(children[2].is_post_script());
    }

    #[test]
    fn test_run_hooks_forward_to_scripts() {
        let pkg = demo_pkg(&[("lint", "eslint .")]);
        let parser = CommandParser::new(&pkg);

        for cmd in ["npm run lint", "yarn run lint", "yarn lint", "pnpm run lint"] {
            let tree = parser.parse(cmd);
            let script = &tree.children()[0];
            assert!(script.is_script_group(), "{} should expand the script", cmd);
            assert_eq!(script.name, "lint");
        }

        // bare yarn with an unknown target stays a plain command
        let tree = parser.parse("yarn add eslint");
        assert_eq!(argv(&tree.children()[0]), vec!["yarn", "add", "eslint"]);
    }

    #[test]
    fn test_self_referential_scripts_do_not_recurse() {
        let pkg = demo_pkg(&[("build", "build --verbose")]);
        let tree = CommandParser::new(&pkg).parse("build");

        let script = &tree.children()[0];
        assert!(script.is_script_group());
        // the inner `build` word falls through to a plain command
        assert_eq!(argv(&script.children()[0]), vec!["build", "--verbose"]);
    }

    #[test]
    fn test_concurrent_marker_comes_from_manifest_settings() {
        let mut pkg = demo_pkg(&[("dev", "watch-css && watch-js")]);
        pkg.concurrent_scripts.push("dev".to_string());
        let tree = CommandParser::new(&pkg).script_node("dev", &[]);

        match &tree.kind {
            NodeKind::Group(group) => assert!(group.concurrent),
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_parses_to_an_empty_group() {
        let pkg = demo_pkg(&[]);
        let tree = CommandParser::new(&pkg).parse("   ");
        assert!(tree.children().is_empty());
    }
}
