//! Text commands operating on the bridge registries.
//!
//! Every registry operation is exposed as a [`Command`] object holding an
//! explicit shared reference to its registry.  A [`CommandTable`] maps
//! `"<entity>.<command>"` names to commands and dispatches whole lines such
//! as `rosExport.add time /time`.
//!
//! Signals created by `rosImport.add` and `rosTfListener.add` are exposed to
//! the export registry under their name, and withdrawn again (bindings
//! included) when removed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dgbridge_middleware::{BindingRegistry, ImportRegistry};
use dgbridge_perception::{DEFAULT_MAX_STALENESS, FallbackPolicy, TransformListener};
use dgbridge_types::{BridgeError, InternalType, SignalRef, SignalSource};
use tracing::{debug, warn};

pub type SharedExport = Arc<Mutex<BindingRegistry>>;
pub type SharedImport = Arc<Mutex<ImportRegistry>>;
pub type SharedListener = Arc<Mutex<TransformListener>>;

/// Result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandValue {
    None,
    Text(String),
    List(Vec<String>),
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandValue::None => Ok(()),
            CommandValue::Text(text) => f.write_str(text),
            CommandValue::List(items) => f.write_str(&items.join("\n")),
        }
    }
}

pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    fn docstring(&self) -> &str;

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError>;
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Check the argument count, naming the expected usage on mismatch.
fn expect_args<'a, const N: usize>(
    command: &str,
    usage: &str,
    args: &[&'a str],
) -> Result<[&'a str; N], BridgeError> {
    <[&'a str; N]>::try_from(args).map_err(|_| BridgeError::Command {
        command: command.to_string(),
        reason: format!("expected {N} argument(s): {usage}"),
    })
}

fn usage_error(command: &str, usage: &str) -> BridgeError {
    BridgeError::Command {
        command: command.to_string(),
        reason: format!("usage: {command} {usage}"),
    }
}

/// Make `signal` bindable by name on the export side.
pub(crate) fn expose(export: &SharedExport, signal: SignalRef) {
    debug!(signal = %signal.name(), "signal exposed for export");
    lock(export).signals_mut().insert(signal);
}

/// Undo [`expose`]: drop the export binding still publishing `signal`, then
/// forget the signal.  Entries of the same name that hold another signal
/// are left alone.
pub(crate) fn withdraw<S: SignalSource + ?Sized>(export: &SharedExport, signal: &Arc<S>) {
    let is_same = |exposed: &SignalRef| std::ptr::addr_eq(Arc::as_ptr(exposed), Arc::as_ptr(signal));
    let name = signal.name();
    let mut export = lock(export);
    if export.signal_of(name).is_some_and(|s| is_same(s))
        && let Err(e) = export.rm(name)
    {
        warn!(signal = %name, error = %e, "failed to drop export binding");
    }
    if export.signals().get(name).is_some_and(|s| is_same(&s)) {
        export.signals_mut().remove(name);
        debug!(signal = %name, "signal withdrawn from export");
    }
}

macro_rules! registry_command {
    ($ty:ident, $shared:ty) => {
        pub struct $ty {
            registry: $shared,
        }

        impl $ty {
            pub fn new(registry: $shared) -> Self {
                Self { registry }
            }
        }
    };
}

/// A command that also keeps the export signal table in step.
macro_rules! linked_command {
    ($ty:ident, $shared:ty) => {
        pub struct $ty {
            registry: $shared,
            export: SharedExport,
        }

        impl $ty {
            pub fn new(registry: $shared, export: SharedExport) -> Self {
                Self { registry, export }
            }
        }
    };
}

// ────────────────────────────────────────────────────────────────────────────
// Export
// ────────────────────────────────────────────────────────────────────────────

registry_command!(ExportAdd, SharedExport);
registry_command!(ExportRm, SharedExport);
registry_command!(ExportList, SharedExport);
registry_command!(ExportClear, SharedExport);

impl Command for ExportAdd {
    fn name(&self) -> &str {
        "add"
    }

    fn docstring(&self) -> &str {
        "Bind a signal to a topic.\n  Usage: add <signal> <topic>"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [signal, topic] = expect_args::<2>("add", "<signal> <topic>", args)?;
        let wire = lock(&self.registry).add(signal, topic)?;
        Ok(CommandValue::Text(format!("{signal} -> {topic} ({wire})")))
    }
}

impl Command for ExportRm {
    fn name(&self) -> &str {
        "rm"
    }

    fn docstring(&self) -> &str {
        "Remove a signal binding.\n  Usage: rm <signal>"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [signal] = expect_args::<1>("rm", "<signal>", args)?;
        lock(&self.registry).rm(signal)?;
        Ok(CommandValue::None)
    }
}

impl Command for ExportList {
    fn name(&self) -> &str {
        "list"
    }

    fn docstring(&self) -> &str {
        "List bound signals."
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [] = expect_args::<0>("list", "", args)?;
        Ok(CommandValue::List(lock(&self.registry).list()))
    }
}

impl Command for ExportClear {
    fn name(&self) -> &str {
        "clear"
    }

    fn docstring(&self) -> &str {
        "Remove all signal bindings."
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [] = expect_args::<0>("clear", "", args)?;
        lock(&self.registry).clear();
        Ok(CommandValue::None)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Import
// ────────────────────────────────────────────────────────────────────────────

linked_command!(ImportAdd, SharedImport);
linked_command!(ImportRm, SharedImport);
registry_command!(ImportList, SharedImport);
linked_command!(ImportClear, SharedImport);

impl Command for ImportAdd {
    fn name(&self) -> &str {
        "add"
    }

    fn docstring(&self) -> &str {
        "Feed a new signal from a topic.\n  Usage: add <type> <signal> <topic>"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [ty, signal, topic] = expect_args::<3>("add", "<type> <signal> <topic>", args)?;
        let internal = InternalType::parse(ty).ok_or_else(|| BridgeError::Command {
            command: "add".to_string(),
            reason: format!(
                "unknown type '{ty}', expected one of: {}",
                InternalType::ALL.map(InternalType::as_str).join(", ")
            ),
        })?;
        let input = lock(&self.registry).add(signal, topic, internal)?;
        expose(&self.export, input);
        Ok(CommandValue::Text(format!("{topic} -> {signal} ({internal})")))
    }
}

impl Command for ImportRm {
    fn name(&self) -> &str {
        "rm"
    }

    fn docstring(&self) -> &str {
        "Stop feeding a signal.\n  Usage: rm <signal>"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [signal] = expect_args::<1>("rm", "<signal>", args)?;
        let input = {
            let mut import = lock(&self.registry);
            let input = import.signal(signal);
            import.rm(signal)?;
            input
        };
        if let Some(input) = input {
            withdraw(&self.export, &input);
        }
        Ok(CommandValue::None)
    }
}

impl Command for ImportList {
    fn name(&self) -> &str {
        "list"
    }

    fn docstring(&self) -> &str {
        "List imported signals."
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [] = expect_args::<0>("list", "", args)?;
        Ok(CommandValue::List(lock(&self.registry).list()))
    }
}

impl Command for ImportClear {
    fn name(&self) -> &str {
        "clear"
    }

    fn docstring(&self) -> &str {
        "Remove all imports."
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [] = expect_args::<0>("clear", "", args)?;
        let inputs = {
            let mut import = lock(&self.registry);
            let inputs: Vec<_> = import
                .list()
                .iter()
                .filter_map(|name| import.signal(name))
                .collect();
            import.clear();
            inputs
        };
        for input in &inputs {
            withdraw(&self.export, input);
        }
        Ok(CommandValue::None)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform listener
// ────────────────────────────────────────────────────────────────────────────

const LISTENER_ADD_USAGE: &str = "<name> <target> <source> <fallback> [max_staleness_ms]";

linked_command!(ListenerAdd, SharedListener);
registry_command!(ListenerList, SharedListener);
linked_command!(ListenerRm, SharedListener);

impl Command for ListenerAdd {
    fn name(&self) -> &str {
        "add"
    }

    fn docstring(&self) -> &str {
        "Track the transform from <source> into <target>, using the <fallback>\n\
         signal when it is missing or older than max_staleness_ms (default 500).\n  \
         Usage: add <name> <target> <source> <fallback> [max_staleness_ms]"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let (name, target, source, fallback, staleness) = match *args {
            [name, target, source, fallback] => (name, target, source, fallback, None),
            [name, target, source, fallback, ms] => (name, target, source, fallback, Some(ms)),
            _ => return Err(usage_error("add", LISTENER_ADD_USAGE)),
        };
        let max_staleness = match staleness {
            None => DEFAULT_MAX_STALENESS,
            Some(ms) => ms
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| BridgeError::Command {
                    command: "add".to_string(),
                    reason: format!("max_staleness_ms must be a whole number, got '{ms}'"),
                })?,
        };
        let fallback_signal = lock(&self.export).signals().require(fallback)?;
        let policy = FallbackPolicy::new(max_staleness, fallback_signal)?;
        let resolver = lock(&self.registry).add(name, target, source, policy)?;
        expose(&self.export, resolver);
        Ok(CommandValue::Text(format!(
            "{name}: {source} -> {target} (fallback {fallback}, {} ms)",
            max_staleness.as_millis()
        )))
    }
}

impl Command for ListenerList {
    fn name(&self) -> &str {
        "list"
    }

    fn docstring(&self) -> &str {
        "List tracked transforms."
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [] = expect_args::<0>("list", "", args)?;
        Ok(CommandValue::List(lock(&self.registry).list()))
    }
}

impl Command for ListenerRm {
    fn name(&self) -> &str {
        "rm"
    }

    fn docstring(&self) -> &str {
        "Stop tracking a transform.\n  Usage: rm <name>"
    }

    fn execute(&self, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let [name] = expect_args::<1>("rm", "<name>", args)?;
        let resolver = {
            let mut listener = lock(&self.registry);
            let resolver = listener.get(name);
            listener.rm(name)?;
            resolver
        };
        if let Some(resolver) = resolver {
            withdraw(&self.export, &resolver);
        }
        Ok(CommandValue::None)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandTable
// ────────────────────────────────────────────────────────────────────────────

/// Commands addressable as `"<entity>.<command>"`.
#[derive(Default)]
pub struct CommandTable {
    commands: BTreeMap<String, Box<dyn Command>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under `entity`.  A command with the same full name
    /// is replaced.
    pub fn insert(&mut self, entity: &str, command: Box<dyn Command>) {
        let key = format!("{entity}.{}", command.name());
        self.commands.insert(key, command);
    }

    pub fn register_export(&mut self, entity: &str, registry: &SharedExport) {
        self.insert(entity, Box::new(ExportAdd::new(Arc::clone(registry))));
        self.insert(entity, Box::new(ExportRm::new(Arc::clone(registry))));
        self.insert(entity, Box::new(ExportList::new(Arc::clone(registry))));
        self.insert(entity, Box::new(ExportClear::new(Arc::clone(registry))));
    }

    /// Import commands.  Imported signals are exposed through `export`.
    pub fn register_import(&mut self, entity: &str, registry: &SharedImport, export: &SharedExport) {
        self.insert(entity, Box::new(ImportAdd::new(Arc::clone(registry), Arc::clone(export))));
        self.insert(entity, Box::new(ImportRm::new(Arc::clone(registry), Arc::clone(export))));
        self.insert(entity, Box::new(ImportList::new(Arc::clone(registry))));
        self.insert(entity, Box::new(ImportClear::new(Arc::clone(registry), Arc::clone(export))));
    }

    /// Transform listener commands.  Fallback signals are looked up in, and
    /// resolved transforms exposed through, `export`.
    pub fn register_listener(
        &mut self,
        entity: &str,
        listener: &SharedListener,
        export: &SharedExport,
    ) {
        self.insert(entity, Box::new(ListenerAdd::new(Arc::clone(listener), Arc::clone(export))));
        self.insert(entity, Box::new(ListenerList::new(Arc::clone(listener))));
        self.insert(entity, Box::new(ListenerRm::new(Arc::clone(listener), Arc::clone(export))));
    }

    /// Full command names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn docstring(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(|c| c.docstring())
    }

    /// Run `name` with `args`.
    pub fn execute(&self, name: &str, args: &[&str]) -> Result<CommandValue, BridgeError> {
        let command = self.commands.get(name).ok_or_else(|| BridgeError::Command {
            command: name.to_string(),
            reason: "unknown command".to_string(),
        })?;
        command.execute(args)
    }

    /// Run a whitespace-separated line: command name, then its arguments.
    /// A blank line does nothing.
    pub fn execute_line(&self, line: &str) -> Result<CommandValue, BridgeError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(CommandValue::None);
        };
        let args: Vec<&str> = words.collect();
        self.execute(name, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use dgbridge_middleware::{BridgeContext, BusTransport, ExportOptions};
    use dgbridge_perception::TfBuffer;
    use dgbridge_types::{MatrixHomogeneous, Signal, SignalTable};

    fn table() -> (SharedExport, SharedImport, CommandTable) {
        let context = BridgeContext::with_transport(Arc::new(BusTransport::new()));
        let mut signals = SignalTable::new();
        signals.insert(Arc::new(Signal::new("time", |t| t as f64)));
        signals.insert(Arc::new(Signal::new("waist_fb", |_| MatrixHomogeneous::identity())));
        let export = Arc::new(Mutex::new(BindingRegistry::new(
            "rosExport",
            context.clone(),
            signals,
            ExportOptions::default(),
        )));
        let import = Arc::new(Mutex::new(ImportRegistry::new("rosImport", context)));

        let mut commands = CommandTable::new();
        commands.register_export("rosExport", &export);
        commands.register_import("rosImport", &import, &export);
        (export, import, commands)
    }

    fn table_with_listener() -> (SharedExport, SharedListener, CommandTable) {
        let (export, _, mut commands) = table();
        let buffer = Arc::new(RwLock::new(TfBuffer::new()));
        let listener = Arc::new(Mutex::new(TransformListener::new("rosTfListener", buffer)));
        commands.register_listener("rosTfListener", &listener, &export);
        (export, listener, commands)
    }

    #[test]
    fn export_commands_drive_the_registry() {
        let (export, _, commands) = table();
        let out = commands.execute_line("rosExport.add time /time").unwrap();
        assert_eq!(out, CommandValue::Text("time -> /time (std_msgs/Float64)".to_string()));
        assert_eq!(lock(&export).list(), vec!["time"]);

        assert_eq!(
            commands.execute_line("rosExport.list").unwrap(),
            CommandValue::List(vec!["time".to_string()])
        );
        commands.execute_line("rosExport.rm time").unwrap();
        assert!(lock(&export).is_empty());
        commands.execute_line("rosExport.clear").unwrap();
    }

    #[test]
    fn import_add_parses_the_type() {
        let (_, import, commands) = table();
        commands
            .execute_line("rosImport.add twist cmd /cmd_vel")
            .unwrap();
        assert_eq!(lock(&import).list(), vec!["cmd"]);

        let err = commands
            .execute_line("rosImport.add quaternion q /q")
            .unwrap_err();
        assert!(err.to_string().contains("unknown type 'quaternion'"));
    }

    #[test]
    fn imported_signal_can_be_exported_by_name() {
        let (export, _, commands) = table();
        commands
            .execute_line("rosImport.add scalar gain /gain_in")
            .unwrap();
        commands.execute_line("rosExport.add gain /gain_out").unwrap();
        assert_eq!(lock(&export).list(), vec!["gain"]);
    }

    #[test]
    fn removing_an_import_withdraws_its_signal_and_binding() {
        let (export, _, commands) = table();
        commands
            .execute_line("rosImport.add scalar gain /gain_in")
            .unwrap();
        commands.execute_line("rosExport.add gain /gain_out").unwrap();
        commands.execute_line("rosExport.add time /time").unwrap();

        commands.execute_line("rosImport.rm gain").unwrap();
        assert_eq!(lock(&export).list(), vec!["time"]);
        assert!(matches!(
            commands.execute_line("rosExport.add gain /gain_out"),
            Err(BridgeError::UnknownSignal(_))
        ));
    }

    #[test]
    fn clearing_imports_withdraws_every_imported_signal() {
        let (export, _, commands) = table();
        commands.execute_line("rosImport.add scalar a /a").unwrap();
        commands.execute_line("rosImport.add count b /b").unwrap();
        commands.execute_line("rosExport.add a /a_out").unwrap();

        commands.execute_line("rosImport.clear").unwrap();
        let export = lock(&export);
        assert!(export.is_empty());
        assert!(export.signals().get("a").is_none());
        assert!(export.signals().get("b").is_none());
        assert!(export.signals().get("time").is_some());
    }

    #[test]
    fn listener_add_exposes_the_resolved_transform() {
        let (export, listener, commands) = table_with_listener();
        let out = commands
            .execute_line("rosTfListener.add waist_tf world waist waist_fb 250")
            .unwrap();
        assert_eq!(
            out,
            CommandValue::Text("waist_tf: waist -> world (fallback waist_fb, 250 ms)".to_string())
        );
        let resolver = lock(&listener).get("waist_tf").unwrap();
        assert_eq!(resolver.policy().max_staleness(), Duration::from_millis(250));

        commands.execute_line("rosExport.add waist_tf /waist").unwrap();
        commands.execute_line("rosTfListener.rm waist_tf").unwrap();
        assert!(lock(&export).is_empty());
        assert!(lock(&export).signals().get("waist_tf").is_none());
    }

    #[test]
    fn listener_add_defaults_and_rejects_bad_arguments() {
        let (_, listener, commands) = table_with_listener();
        commands
            .execute_line("rosTfListener.add waist_tf world waist waist_fb")
            .unwrap();
        let resolver = lock(&listener).get("waist_tf").unwrap();
        assert_eq!(resolver.policy().max_staleness(), DEFAULT_MAX_STALENESS);

        assert!(matches!(
            commands.execute_line("rosTfListener.add a world waist missing"),
            Err(BridgeError::UnknownSignal(_))
        ));
        assert!(matches!(
            commands.execute_line("rosTfListener.add a world waist time"),
            Err(BridgeError::SignalTypeMismatch { .. })
        ));
        assert!(matches!(
            commands.execute_line("rosTfListener.add a world waist waist_fb soon"),
            Err(BridgeError::Command { .. })
        ));
        assert!(matches!(
            commands.execute_line("rosTfListener.add a world"),
            Err(BridgeError::Command { .. })
        ));
        assert_eq!(lock(&listener).list(), vec!["waist_tf"]);
    }

    #[test]
    fn registry_errors_pass_through() {
        let (_, _, commands) = table();
        assert!(matches!(
            commands.execute_line("rosExport.rm nope"),
            Err(BridgeError::UnknownBinding(_))
        ));
        assert!(matches!(
            commands.execute_line("rosExport.add nope /n"),
            Err(BridgeError::UnknownSignal(_))
        ));
    }

    #[test]
    fn wrong_arity_is_a_command_error() {
        let (_, _, commands) = table();
        let err = commands.execute_line("rosExport.add time").unwrap_err();
        assert!(matches!(err, BridgeError::Command { .. }));
        assert!(err.to_string().contains("<signal> <topic>"));
        assert!(commands.execute_line("rosExport.list extra").is_err());
    }

    #[test]
    fn unknown_command_and_blank_line() {
        let (_, _, commands) = table();
        assert!(matches!(
            commands.execute_line("rosExport.frobnicate"),
            Err(BridgeError::Command { .. })
        ));
        assert_eq!(commands.execute_line("   ").unwrap(), CommandValue::None);
    }

    #[test]
    fn names_and_docstrings() {
        let (_, _, commands) = table();
        assert_eq!(commands.names().len(), 8);
        assert!(commands.names().contains(&"rosImport.add".to_string()));
        assert!(commands.docstring("rosExport.add").unwrap().contains("Usage"));
        assert!(commands.docstring("missing").is_none());
    }

    #[test]
    fn command_value_display() {
        assert_eq!(CommandValue::None.to_string(), "");
        assert_eq!(
            CommandValue::List(vec!["a".into(), "b".into()]).to_string(),
            "a\nb"
        );
    }
}
