// Single-page dashboard, served from memory at `/`.
// Renders the same JSON projections the API exposes; nothing here can
// mutate the agent.

pub const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Windlass</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; background: #14171a; color: #e6e6e6; }
  h1 { font-size: 1.4rem; }
  h2 { font-size: 1.1rem; margin-top: 2rem; }
  table { border-collapse: collapse; width: 100%; margin-top: .5rem; }
  th, td { text-align: left; padding: .4rem .8rem; border-bottom: 1px solid #2c3238; font-size: .9rem; }
  th { color: #9aa4ad; font-weight: 600; }
  .ok { color: #6cc070; }
  .bad { color: #e06c75; }
  .muted { color: #9aa4ad; }
  #summary { display: flex; gap: 2rem; margin-top: 1rem; }
  .stat { background: #1d2227; padding: .8rem 1.2rem; border-radius: 6px; }
  .stat .n { font-size: 1.4rem; font-weight: 700; }
</style>
</head>
<body>
<h1>Windlass agent</h1>
<div id="summary"></div>
<h2>Workflows</h2>
<table id="workflows"><thead><tr>
  <th>Name</th><th>Trigger</th><th>Status</th><th>Runs</th><th>OK</th><th>Failed</th><th>Next</th><th>Last error</th>
</tr></thead><tbody></tbody></table>
<h2>Recent executions</h2>
<table id="history"><thead><tr>
  <th>ID</th><th>Workflow</th><th>Status</th><th>Started</th><th>Duration</th><th>Error</th>
</tr></thead><tbody></tbody></table>
<script>
async function refresh() {
  const status = await (await fetch('/status')).json();
  const history = await (await fetch('/api/workflows/history?limit=25')).json();

  document.getElementById('summary').innerHTML = [
    ['Uptime', Math.floor(status.uptime_seconds) + 's'],
    ['Workflows', status.workflows.active + '/' + status.workflows.total + ' active'],
    ['Executions', status.executions.total],
    ['Failed', status.executions.failed],
  ].map(([k, v]) => `<div class="stat"><div class="muted">${k}</div><div class="n">${v}</div></div>`).join('');

  document.querySelector('#workflows tbody').innerHTML = status.details.map(w => `<tr>
    <td>${w.name}</td>
    <td>${w.trigger_type}${w.schedule ? ' <span class="muted">' + w.schedule + '</span>' : ''}</td>
    <td class="${w.status === 'active' ? 'ok' : 'bad'}">${w.status}</td>
    <td>${w.total_executions}</td>
    <td class="ok">${w.succeeded}</td>
    <td class="${w.failed ? 'bad' : ''}">${w.failed}</td>
    <td class="muted">${w.next_execution ?? ''}</td>
    <td class="bad">${w.last_error ?? ''}</td>
  </tr>`).join('');

  document.querySelector('#history tbody').innerHTML = history.map(e => `<tr>
    <td class="muted">${e.id}</td>
    <td>${e.workflow_name}</td>
    <td class="${e.status === 'success' ? 'ok' : e.status === 'failed' ? 'bad' : 'muted'}">${e.status}</td>
    <td class="muted">${e.started_at}</td>
    <td>${e.duration_ms ?? ''}${e.duration_ms != null ? 'ms' : ''}</td>
    <td class="bad">${e.error ?? ''}</td>
  </tr>`).join('');
}
refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;
