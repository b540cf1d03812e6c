pub mod optim;
pub mod switchtab;
