#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Dashboard,
    ConfirmQuit,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub running: bool,
    pub compact_mode: bool,
    pub screen: Screen,
    pub confirm_selected: usize,
    pub status: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            running: true,
            compact_mode: false,
            screen: Screen::Dashboard,
            confirm_selected: 0,
            status: "starting".into(),
        }
    }
}
