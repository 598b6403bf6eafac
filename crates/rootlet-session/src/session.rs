//! The session controller: drives one chroot session from argument
//! validation through execution and teardown.
//!
//! The controller is a forward-only state machine. Every state transition
//! is logged; the only loop-back is inside `RunningSetup`, where an
//! unfinished setup script may be re-run without leaving the state.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rootlet_common::config::SessionOptions;
use rootlet_common::constants::{
    DEVICE_CLASS_DIRS, FIRSTBOOT_SCRIPT, HOST_DBUS_DIR, HOST_MEDIA_DIR, HOST_MODULES_DIR,
    HOST_NETWORK_DIR, HOST_ZONEINFO_DIR, INIT_PIDFILE, SETUP_SCRIPT, SHARE_CONFIG_FILE,
    SYS_ACCESS_CONTROL_DIR,
};
use rootlet_common::error::{Result, RootletError, EXIT_FAILURE};
use rootlet_common::types::{ChrootDescriptor, ExecutionMode, SessionState};
use rootlet_core::cleanup::{self, SharedRegistry};
use rootlet_core::mount::{MountOpts, MountOrchestrator, Mounter};
use rootlet_shares::{parser, ShareBases, ShareMounter};

use crate::background;
use crate::groups::IdentityReconciler;
use crate::guest::{self, GuestContext, GuestUser};
use crate::{metadata, select, services, setup};

/// Drives one session against one guest.
pub struct SessionController {
    opts: SessionOptions,
    mounter: Arc<dyn Mounter>,
    registry: SharedRegistry,
    state: SessionState,
    first_run: Option<bool>,
}

impl SessionController {
    /// Creates a controller. The mounter is injected so tests can run the
    /// full lifecycle without touching the host mount table.
    #[must_use]
    pub fn new(opts: SessionOptions, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            opts,
            mounter,
            registry: cleanup::shared(),
            state: SessionState::ParsingArgs,
            first_run: None,
        }
    }

    /// Returns the cleanup registry, for inspection after a run.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Whether the run found the guest's run directory unmounted (a first
    /// entry). `None` until the mount phase has been reached.
    #[must_use]
    pub const fn first_run(&self) -> Option<bool> {
        self.first_run
    }

    /// Runs the session to completion and returns the exit code of the
    /// executed command.
    ///
    /// Teardown always runs, on success and on error alike. With
    /// `keep_mounts` set, or in init-attach mode where the guest init owns
    /// the mounts, the registry is disarmed first and the mounts survive.
    ///
    /// # Errors
    ///
    /// Returns an error when a fatal step fails: argument validation, guest
    /// selection, a core base mount, user lookup, or spawning the command.
    pub fn run(&mut self) -> Result<i32> {
        let result = self.drive();

        self.advance(SessionState::TearingDown);
        // Ownership transfers to the outer session (keep_mounts) or to a
        // successfully attached guest init; a failed attach still unwinds.
        let transfer = self.opts.keep_mounts
            || (matches!(self.opts.mode, ExecutionMode::InitAttach) && result.is_ok());
        if transfer {
            if let Ok(mut reg) = self.registry.lock() {
                reg.disarm();
            }
        }
        cleanup::run_shared(&self.registry);

        result
    }

    fn drive(&mut self) -> Result<i32> {
        self.opts.validate()?;

        self.advance(SessionState::ResolvingChroot);
        let desc = select::select_chroot(&self.opts)?;
        if !desc.root.join("etc").is_dir() {
            return Err(RootletError::InvalidChroot {
                name: desc.name.clone(),
                message: "no /etc directory (encrypted and not unlocked?)".into(),
            });
        }
        tracing::info!(
            chroot = %desc.name,
            release = %desc.release,
            external_init = desc.external_init,
            "entering guest"
        );

        if let Err(e) = cleanup::install_interrupt_handler(&self.registry) {
            // A handler from an enclosing session already covers us.
            tracing::debug!(error = %e, "interrupt handler not installed");
        }

        let orchestrator = MountOrchestrator::new(
            desc.root.clone(),
            Arc::clone(&self.mounter),
            Arc::clone(&self.registry),
        );

        self.advance(SessionState::MountingBase);
        let first_run = !orchestrator.is_mounted(Path::new("/run"))?;
        self.first_run = Some(first_run);
        tracing::debug!(first_run, "probed guest run directory");
        self.mount_base(&desc, &orchestrator)?;

        if let Err(e) = metadata::refresh(&desc) {
            tracing::warn!(error = %e, "guest metadata refresh failed");
        }

        let ctx = GuestContext::new(&desc.root);

        self.advance(SessionState::RunningSetup);
        self.run_setup(&desc, &ctx, first_run);

        let user = if self.opts.mode.is_login() {
            Some(guest::lookup_user(&desc.root, self.opts.user.as_deref())?)
        } else {
            None
        };

        if self.opts.mode.is_login() {
            self.advance(SessionState::MountingShares);
            self.mount_shares(&desc, &orchestrator, user.as_ref());
        }

        self.advance(SessionState::ReconcilingGroups);
        if let Err(e) = IdentityReconciler::new(&ctx).reconcile() {
            tracing::warn!(error = %e, "group reconciliation skipped");
        }

        self.advance(SessionState::LaunchingServices);
        let launched = services::launch_all(&ctx);
        tracing::debug!(launched, "guest services started");

        self.advance(SessionState::Executing);
        self.execute(&desc, &ctx, user.as_ref())
    }

    fn advance(&mut self, to: SessionState) {
        debug_assert!(to >= self.state, "session state must move forward");
        if to != self.state {
            tracing::debug!(from = %self.state, to = %to, "session state");
            self.state = to;
        }
    }

    /// The fixed base mount sequence. Core mounts are fatal; host resources
    /// that may legitimately be absent are skipped with a warning.
    fn mount_base(&self, desc: &ChrootDescriptor, orch: &MountOrchestrator) -> Result<()> {
        let plain = MountOpts::default();
        let rec = MountOpts::parse("rec");
        let ro = MountOpts::parse("ro");

        // Device nodes first, recursive and shared so host hot-plug events
        // keep propagating into a running session.
        let _ = orch.bind_self(Path::new("/dev"), &rec)?;
        orch.make_shared(Path::new("/dev"), true)?;
        let _ = orch.bind_self(Path::new("/dev/shm"), &plain)?;
        let _ = orch.bind_self(Path::new("/dev/pts"), &plain)?;

        if desc.external_init {
            tracing::debug!("guest init owns /tmp and /proc, not mounting them");
        } else {
            let _ = orch.bind_self(Path::new("/tmp"), &plain)?;
            let _ = orch.pseudo("proc", Path::new("/proc"), &plain)?;
        }

        let _ = orch.tmpfs(Path::new("/run"), &MountOpts::parse("mode=0755"))?;
        let _ = orch.tmpfs(Path::new("/run/lock"), &MountOpts::parse("mode=1777"))?;

        let _ = self.bind_optional(orch, HOST_DBUS_DIR, "/run/dbus", &plain, None);
        let _ = self.bind_optional(orch, HOST_NETWORK_DIR, "/run/network", &plain, None);
        let _ = self.bind_optional(orch, HOST_ZONEINFO_DIR, HOST_ZONEINFO_DIR, &plain, Some(&ro));
        let _ = self.bind_optional(orch, HOST_MODULES_DIR, HOST_MODULES_DIR, &plain, Some(&ro));

        // Device-class trees for hardware this host actually has.
        for dir in DEVICE_CLASS_DIRS {
            if self.bind_optional(orch, dir, dir, &rec, None) {
                if let Err(e) = orch.make_shared(Path::new(dir), true) {
                    tracing::warn!(dir, error = %e, "could not share device tree");
                }
            }
        }

        // /sys is a slave: host changes flow in, guest changes never flow
        // back out.
        let _ = orch.bind_self(Path::new("/sys"), &rec)?;
        orch.make_slave(Path::new("/sys"), true)?;
        let access_control = Path::new("/").join(SYS_ACCESS_CONTROL_DIR);
        if access_control.exists() {
            let guest_rel = Path::new("/sys/fs/selinux");
            let _ = orch.tmpfs(guest_rel, &MountOpts::parse("mode=0755"))?;
        }

        if self.bind_optional(orch, HOST_MEDIA_DIR, HOST_MEDIA_DIR, &rec, None) {
            if let Err(e) = orch.make_shared(Path::new(HOST_MEDIA_DIR), true) {
                tracing::warn!(error = %e, "could not share removable-media tree");
            }
        }

        Ok(())
    }

    /// Binds a host resource that is allowed to be missing. Returns whether
    /// a new mount was made.
    fn bind_optional(
        &self,
        orch: &MountOrchestrator,
        source: &str,
        dest: &str,
        opts: &MountOpts,
        remount: Option<&MountOpts>,
    ) -> bool {
        let source = Path::new(source);
        if !source.exists() {
            tracing::debug!(source = %source.display(), "host resource absent, skipping");
            return false;
        }
        match orch.bind(source, Path::new(dest), opts, remount) {
            Ok(made) => made,
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "optional mount failed");
                false
            }
        }
    }

    /// First-boot and setup-script handling. Never fatal: a failing script
    /// is reported and the session continues.
    fn run_setup(&self, desc: &ChrootDescriptor, ctx: &GuestContext, first_run: bool) {
        if first_run && desc.root.join(FIRSTBOOT_SCRIPT).exists() {
            tracing::info!(chroot = %desc.name, "running first-boot script");
            let watchdog = Watchdog::start(&desc.name);
            let outcome = self.run_guest_script(ctx, &format!("/{FIRSTBOOT_SCRIPT}"));
            drop(watchdog);
            match outcome {
                Ok(0) => {}
                Ok(code) => tracing::warn!(code, "first-boot script exited nonzero"),
                Err(e) => tracing::warn!(error = %e, "first-boot script failed to run"),
            }
        }

        if !matches!(self.opts.mode, ExecutionMode::Login) {
            return;
        }

        loop {
            match setup::setup_script_status(&desc.root) {
                None => break,
                Some(setup::SetupScriptStatus::FinishedNotCleaned) => {
                    if setup::prompt_yes_no(
                        "The setup script has finished but is still present. Delete it?",
                    ) {
                        if let Err(e) = setup::delete_setup_script(&desc.root) {
                            tracing::warn!(error = %e, "could not delete setup script");
                        }
                    }
                    break;
                }
                Some(setup::SetupScriptStatus::Pending) => {
                    if !setup::prompt_yes_no(
                        "This chroot has an unfinished setup script. Run it now?",
                    ) {
                        break;
                    }
                    if let Err(e) = self.run_setup_subsession(desc) {
                        tracing::warn!(error = %e, "setup sub-session failed");
                        break;
                    }
                    // Without a terminal the prompt auto-answers yes; one
                    // attempt is enough, re-asking would spin forever.
                    if !std::io::stdin().is_terminal() {
                        break;
                    }
                }
            }
        }
    }

    /// Runs the setup script through a nested session that keeps the outer
    /// session's mounts in place.
    fn run_setup_subsession(&self, desc: &ChrootDescriptor) -> Result<()> {
        let sub_opts = SessionOptions {
            name: Some(desc.name.clone()),
            chroots_dir: self.opts.chroots_dir.clone(),
            user: None,
            mode: ExecutionMode::Direct {
                command: vec![format!("/{SETUP_SCRIPT}")],
            },
            background: false,
            keep_mounts: true,
            require_capability: None,
            weak_random: self.opts.weak_random,
        };
        let mut sub = SessionController::new(sub_opts, Arc::clone(&self.mounter));
        let code = sub.run()?;
        if code != 0 {
            tracing::warn!(code, "setup script exited nonzero");
        }
        Ok(())
    }

    fn run_guest_script(&self, ctx: &GuestContext, guest_path: &str) -> Result<i32> {
        let mut cmd = ctx.command(guest_path);
        let _ = cmd.env_clear();
        self.apply_session_env(&mut cmd);
        let status = cmd.status().map_err(|e| RootletError::Exec {
            program: guest_path.to_owned(),
            source: e,
        })?;
        Ok(status.code().unwrap_or(EXIT_FAILURE))
    }

    fn mount_shares(&self, desc: &ChrootDescriptor, orch: &MountOrchestrator, user: Option<&GuestUser>) {
        let path = desc.root.join(SHARE_CONFIG_FILE);
        let config = match parser::load_or_create(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "share config unavailable");
                return;
            }
        };
        for error in &config.errors {
            tracing::warn!(line = error.line, text = %error.text, message = %error.message, "share line rejected");
        }

        let home = user.map(|u| u.home.clone());
        let mounter = ShareMounter::new(orch, ShareBases::default(), home);
        let mounted = mounter.mount_all(&config.rules);
        tracing::debug!(mounted, rules = config.rules.len(), "shares mounted");
    }

    fn execute(
        &mut self,
        desc: &ChrootDescriptor,
        ctx: &GuestContext,
        user: Option<&GuestUser>,
    ) -> Result<i32> {
        if matches!(self.opts.mode, ExecutionMode::InitAttach) {
            return self.attach_init(desc);
        }

        let cmd = self.build_command(ctx, user)?;
        if self.opts.background {
            background::run_detached(cmd, &self.registry)?;
            return Ok(0);
        }
        let mut cmd = cmd;
        let program = cmd.get_program().to_string_lossy().into_owned();
        let status = cmd.status().map_err(|e| RootletError::Exec {
            program,
            source: e,
        })?;
        Ok(status.code().unwrap_or(EXIT_FAILURE))
    }

    fn build_command(&self, ctx: &GuestContext, user: Option<&GuestUser>) -> Result<Command> {
        match &self.opts.mode {
            ExecutionMode::Direct { command } => {
                let program = command.first().ok_or_else(|| RootletError::Usage {
                    message: "empty command".into(),
                })?;
                let mut cmd = ctx.command(program);
                let _ = cmd.args(&command[1..]);
                let _ = cmd.env_clear();
                self.apply_session_env(&mut cmd);
                Ok(cmd)
            }
            ExecutionMode::Login => {
                let user = user.ok_or_else(|| RootletError::Usage {
                    message: "login mode requires a resolved guest user".into(),
                })?;
                let mut cmd = self.login_shell(ctx, user);
                // A leading dash makes the shell read its login profile.
                let shell_name = user
                    .shell
                    .file_name()
                    .map_or_else(|| "sh".to_owned(), |n| n.to_string_lossy().into_owned());
                {
                    use std::os::unix::process::CommandExt;
                    let _ = cmd.arg0(format!("-{shell_name}"));
                }
                Ok(cmd)
            }
            ExecutionMode::UserCommand { command } => {
                let user = user.ok_or_else(|| RootletError::Usage {
                    message: "user-command mode requires a resolved guest user".into(),
                })?;
                let mut cmd = self.login_shell(ctx, user);
                let _ = cmd.args(["-c", &guest::shell_join(command)]);
                Ok(cmd)
            }
            ExecutionMode::InitAttach => Err(RootletError::Usage {
                message: "init attach does not build a chroot command".into(),
            }),
        }
    }

    fn login_shell(&self, ctx: &GuestContext, user: &GuestUser) -> Command {
        let shell = user.shell.to_string_lossy().into_owned();
        let mut cmd = ctx.command_as(&shell, user);
        let _ = cmd.env_clear();
        self.apply_session_env(&mut cmd);
        let _ = cmd
            .env("HOME", &user.home)
            .env("USER", &user.name)
            .env("LOGNAME", &user.name)
            .env("SHELL", &shell);
        cmd
    }

    fn apply_session_env(&self, cmd: &mut Command) {
        let term = std::env::var("TERM").unwrap_or_else(|_| "linux".to_owned());
        let _ = cmd.env("TERM", term);
        if self.opts.weak_random {
            let _ = cmd.env("ROOTLET_WEAK_RANDOM", "1");
        }
    }

    /// Locates or starts the guest init, then enters its namespaces.
    fn attach_init(&self, desc: &ChrootDescriptor) -> Result<i32> {
        let pidfile = desc.root.join(INIT_PIDFILE);
        let running = std::fs::read_to_string(&pidfile)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|pid| PathBuf::from(format!("/proc/{pid}")).is_dir());

        let pid = match running {
            Some(pid) => {
                tracing::info!(pid, "attaching to running guest init");
                pid
            }
            None => self.spawn_guest_init(desc)?,
        };

        let mut cmd = Command::new("nsenter");
        let _ = cmd.args([
            "--target",
            &pid.to_string(),
            "--mount",
            "--uts",
            "--ipc",
            &format!("--root={}", desc.root.display()),
            "--wd=/",
            "--",
            "/bin/sh",
            "-l",
        ]);
        let status = cmd.status().map_err(|e| RootletError::Exec {
            program: "nsenter".into(),
            source: e,
        })?;
        Ok(status.code().unwrap_or(EXIT_FAILURE))
    }

    /// Starts `/sbin/init` inside the guest under fresh mount, UTS, and IPC
    /// namespaces, records its pid, and leaves it running.
    #[allow(unsafe_code)]
    fn spawn_guest_init(&self, desc: &ChrootDescriptor) -> Result<u32> {
        use std::os::unix::process::CommandExt;

        let root = desc.root.clone();
        let mut cmd = Command::new("/sbin/init");
        let _ = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // SAFETY: only async-signal-safe syscalls run between fork and exec.
        unsafe {
            let _ = cmd.pre_exec(move || {
                let _ = nix::unistd::setsid().map_err(guest::errno_to_io)?;
                nix::sched::unshare(
                    nix::sched::CloneFlags::CLONE_NEWNS
                        | nix::sched::CloneFlags::CLONE_NEWUTS
                        | nix::sched::CloneFlags::CLONE_NEWIPC,
                )
                .map_err(guest::errno_to_io)?;
                // Keep the new namespace's mounts from leaking back out.
                nix::mount::mount(
                    None::<&str>,
                    "/",
                    None::<&str>,
                    nix::mount::MsFlags::MS_REC | nix::mount::MsFlags::MS_PRIVATE,
                    None::<&str>,
                )
                .map_err(guest::errno_to_io)?;
                nix::unistd::chroot(&root).map_err(guest::errno_to_io)?;
                nix::unistd::chdir("/").map_err(guest::errno_to_io)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| RootletError::Exec {
            program: "/sbin/init".into(),
            source: e,
        })?;
        let pid = child.id();
        tracing::info!(pid, chroot = %desc.name, "started guest init");

        let pidfile = desc.root.join(INIT_PIDFILE);
        if let Some(parent) = pidfile.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RootletError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&pidfile, format!("{pid}\n")).map_err(|e| RootletError::Io {
            path: pidfile,
            source: e,
        })?;
        Ok(pid)
    }
}

/// Warns periodically while a long first-boot script runs, so an operator
/// watching a silent terminal knows the session is not hung.
struct Watchdog {
    stop: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    const INTERVAL: Duration = Duration::from_secs(30);

    fn start(name: &str) -> Self {
        let (stop, ticks) = mpsc::channel::<()>();
        let name = name.to_owned();
        let handle = std::thread::spawn(move || loop {
            match ticks.recv_timeout(Self::INTERVAL) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!(chroot = %name, "first-boot script is still running");
                }
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn watchdog_stops_on_drop() {
        let watchdog = Watchdog::start("testy");
        drop(watchdog);
    }

    #[test]
    fn controller_starts_in_parsing_state() {
        let controller = SessionController::new(
            SessionOptions::default(),
            Arc::new(rootlet_core::mount::FakeMounter::new()),
        );
        assert_eq!(controller.state, SessionState::ParsingArgs);
    }

    #[test]
    fn invalid_option_combination_fails_before_mounting() {
        let opts = SessionOptions {
            mode: ExecutionMode::InitAttach,
            background: true,
            ..SessionOptions::default()
        };
        let mounter = Arc::new(rootlet_core::mount::FakeMounter::new());
        let mut controller =
            SessionController::new(opts, Arc::clone(&mounter) as Arc<dyn Mounter>);
        assert!(controller.run().is_err());
        assert!(mounter.mount_calls().is_empty());
    }
}
