// ============================================================================
// 门面操作层：展示层可调用的命令式操作
// ✅ 只能做：调用宿主请求、经 services 层修改缓存、发出通知
// ⛔ 禁止：绕过 ProjectCache / ScriptOutputStore 直接修改状态
// ============================================================================

pub mod project;
pub mod script;
