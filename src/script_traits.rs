//! Type-safe script argument contracts.
//!
//! Action scripts are plain executables, but the flags ms-util hands them
//! form a contract every script in the scripts directory parses the same
//! way. The `ScriptArgs` trait keeps that contract in one place instead of
//! assembling raw argument vectors at each call site.

/// Trait for typed script arguments.
///
/// # Contract
///
/// - `to_cli_args()`: Returns CLI arguments exactly as the script expects them.
/// - `get_env_vars()`: Returns environment variables the script may read.
/// - `script_name()`: Returns the action reference, relative to the scripts directory.
///
/// # Example
///
/// ```
/// use mediascreen::script_traits::ScriptArgs;
/// use mediascreen::scripts::action::ActionArgs;
///
/// let args = ActionArgs::new("net.sh").auto(true).debug(true);
/// assert_eq!(args.to_cli_args(), ["--auto", "--debug"]);
/// assert_eq!(args.script_name(), "net.sh");
/// ```
pub trait ScriptArgs {
    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Get environment variables passed to the script.
    fn get_env_vars(&self) -> Vec<(String, String)>;

    /// Get the script reference (e.g., "net.sh" or "tools/ufw.sh").
    ///
    /// The execution layer resolves the full path.
    fn script_name(&self) -> &str;
}
