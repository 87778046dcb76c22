use backup_core::BackupService;

pub struct AppState {
    pub service: BackupService,
}

impl AppState {
    pub fn new(service: BackupService) -> Self {
        Self { service }
    }
}
