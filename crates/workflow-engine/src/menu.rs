use crate::orchestrator::{record_binary, record_drivers, UpdateOrchestrator};
use crate::prompt::Prompt;
use cloverup_host_macos::{DiskService, MountResolver, MountTable};
use cloverup_report::{OperationRecord, RunSummary};
use cloverup_safety::{can_write_to_partition, SafetyDecision};
use log::{error, info, warn};
use std::io::{BufRead, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    UpdateBootAndLoader,
    UpdateDrivers,
    UpdateAll,
    Exit,
}

impl MenuAction {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(MenuAction::UpdateBootAndLoader),
            "2" => Some(MenuAction::UpdateDrivers),
            "3" => Some(MenuAction::UpdateAll),
            "4" => Some(MenuAction::Exit),
            _ => None,
        }
    }
}

const MENU: [&str; 5] = [
    "=== Clover update menu ===",
    "1. Update BOOTX64.efi and CLOVERX64.efi",
    "2. Update UEFI drivers",
    "3. Update everything",
    "4. Exit",
];

/// Main menu loop. Every update re-checks that the partition is still
/// writable; a refused action returns to the menu. Ends on exit or end of input.
pub fn run_menu<D, M, R, W>(
    resolver: &MountResolver<'_, D, M>,
    orchestrator: &UpdateOrchestrator,
    prompt: &mut Prompt<R, W>,
    summary: &mut RunSummary,
) where
    D: DiskService,
    M: MountTable,
    R: BufRead,
    W: Write,
{
    let efi_root = orchestrator.target().efi_root.clone();
    loop {
        prompt.say("");
        for line in MENU {
            prompt.say(line);
        }
        let Some(answer) = prompt.ask("Choose an option:") else {
            info!("event=exiting reason=end_of_input");
            return;
        };
        let Some(action) = MenuAction::parse(&answer) else {
            warn!("event=invalid_option input={:?}", answer);
            continue;
        };
        if action == MenuAction::Exit {
            info!("event=exiting");
            return;
        }
        if !partition_writable(resolver, &efi_root) {
            continue;
        }

        match action {
            MenuAction::UpdateBootAndLoader => {
                for record in update_boot_and_loader(orchestrator) {
                    summary.record(record);
                }
            }
            MenuAction::UpdateDrivers => {
                summary.record(record_drivers(&orchestrator.replace_drivers()));
            }
            MenuAction::UpdateAll => {
                let result = orchestrator.update_all();
                summary.record(record_binary("update_bootx64", &result.boot_stub));
                summary.record(record_binary("update_cloverx64", &result.primary_loader));
                summary.record(record_drivers(&result.drivers));
            }
            MenuAction::Exit => return,
        }
    }
}

fn partition_writable<D: DiskService, M: MountTable>(
    resolver: &MountResolver<'_, D, M>,
    efi_root: &Path,
) -> bool {
    match can_write_to_partition(&resolver.mount_state(efi_root)) {
        SafetyDecision::Allow => {
            info!("event=efi_ready efi_dir={}", efi_root.display());
            true
        }
        SafetyDecision::Deny(reason) => {
            error!("event=efi_not_writable efi_dir={} reason={:?}", efi_root.display(), reason);
            false
        }
    }
}

fn update_boot_and_loader(orchestrator: &UpdateOrchestrator) -> Vec<OperationRecord> {
    info!("event=start_update_boot_clover");
    let boot = orchestrator.replace_boot_stub();
    let loader = orchestrator.replace_primary_loader();
    if boot.is_ok() && loader.is_ok() {
        info!("event=boot_clover_update_success");
    } else {
        error!("event=boot_clover_update_error");
    }
    vec![
        record_binary("update_bootx64", &boot),
        record_binary("update_cloverx64", &loader),
    ]
}
